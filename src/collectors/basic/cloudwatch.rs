use crate::{
    collectors::{
        scrape::Scrape,
        sink::{MetricDesc, MetricSink, Sample},
    },
    sessions::{Instance, Session},
};
use anyhow::{Result, anyhow};
use aws_sdk_cloudwatch::{
    Client,
    error::DisplayErrorContext,
    primitives::DateTime,
    types::{Datapoint, Dimension, Statistic},
};
use futures::future::BoxFuture;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument as _;

const NAMESPACE: &str = "AWS/RDS";
const DIMENSION: &str = "DBInstanceIdentifier";
const PERIOD_SECONDS: i32 = 60;
const WINDOW: Duration = Duration::from_secs(600);

/// Reads the newest one-minute average of each metric from CloudWatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct CloudWatchScraper;

impl CloudWatchScraper {
    pub const fn new() -> Self {
        Self
    }
}

impl Scrape for CloudWatchScraper {
    fn scrape<'a>(
        &'a self,
        session: &'a Session,
        instance: &'a Instance,
        metrics: &'a [MetricDesc],
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if instance.disable_basic_metrics {
                debug!(%instance, "basic metrics disabled");
                return Ok(());
            }

            let config = session
                .sdk_config()
                .ok_or_else(|| anyhow!("session {} has no AWS configuration", session.key()))?;
            let client = Client::new(config);

            let end = SystemTime::now();
            let start = end.checked_sub(WINDOW).unwrap_or(SystemTime::UNIX_EPOCH);
            let labels = instance.metric_labels();
            let mut first_error = None;

            for metric in metrics {
                let Some(source) = metric.source.as_deref() else {
                    continue;
                };

                let span = info_span!(
                    "cloudwatch.get_metric_statistics",
                    otel.kind = "client",
                    metric = source
                );

                match latest_average(&client, session, instance, source, start, end)
                    .instrument(span)
                    .await
                {
                    Ok(Some(value)) => {
                        sink.send(Sample::new(metric, value).with_labels(labels.clone()));
                    }
                    Ok(None) => debug!(%instance, metric = source, "no datapoints"),
                    Err(e) => {
                        warn!(%instance, metric = source, error = %e, "failed to get metric");
                        first_error.get_or_insert(e);
                    }
                }
            }

            first_error.map_or(Ok(()), Err)
        })
    }
}

async fn latest_average(
    client: &Client,
    session: &Session,
    instance: &Instance,
    metric: &str,
    start: SystemTime,
    end: SystemTime,
) -> Result<Option<f64>> {
    let started = Instant::now();

    let output = client
        .get_metric_statistics()
        .namespace(NAMESPACE)
        .metric_name(metric)
        .dimensions(
            Dimension::builder()
                .name(DIMENSION)
                .value(instance.name.as_str())
                .build(),
        )
        .start_time(DateTime::from(start))
        .end_time(DateTime::from(end))
        .period(PERIOD_SECONDS)
        .statistics(Statistic::Average)
        .send()
        .await;

    session.transport().metrics().observe(
        "cloudwatch",
        "GetMetricStatistics",
        output.is_ok(),
        started.elapsed(),
    );

    let output = output.map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;

    Ok(newest(output.datapoints()))
}

/// Average of the most recent datapoint; CloudWatch returns them unordered.
fn newest(points: &[Datapoint]) -> Option<f64> {
    points
        .iter()
        .filter_map(|p| Some((p.timestamp()?.as_secs_f64(), p.average()?)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, value)| value)
}
