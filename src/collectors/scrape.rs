use crate::{
    collectors::sink::{MetricDesc, MetricSink},
    sessions::{Instance, Session, SessionPool},
};
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, warn};
use tracing_futures::Instrument as _;

/// Retrieves metric values for one instance and writes them to the sink.
///
/// Called concurrently, once per instance per collection cycle.
pub trait Scrape: Send + Sync {
    fn scrape<'a>(
        &'a self,
        session: &'a Session,
        instance: &'a Instance,
        metrics: &'a [MetricDesc],
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub spawned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Spawn one scrape per selected instance and wait for all of them.
///
/// Each task's result is captured on its own: an error, a panic or an
/// exceeded `deadline` is logged against that instance and never keeps the
/// barrier from completing for the others.
pub async fn fan_out<F>(
    pool: &SessionPool,
    scraper: &Arc<dyn Scrape>,
    metrics: &Arc<[MetricDesc]>,
    sink: &MetricSink,
    deadline: Option<Duration>,
    select: F,
) -> FanOut
where
    F: Fn(&Instance) -> bool,
{
    let mut tasks = JoinSet::new();
    let mut report = FanOut::default();

    for (session, instances) in pool.sessions() {
        for instance in instances.iter().filter(|i| select(i)) {
            let session = Arc::clone(session);
            let instance = Arc::clone(instance);
            let scraper = Arc::clone(scraper);
            let metrics = Arc::clone(metrics);
            let sink = sink.clone();

            let span = info_span!(
                "instance.scrape",
                instance = %instance,
                otel.kind = "internal"
            );

            tasks.spawn(
                async move {
                    let scrape = scraper.scrape(&session, &instance, &metrics, &sink);
                    let result = match deadline {
                        Some(limit) => tokio::time::timeout(limit, scrape)
                            .await
                            .unwrap_or_else(|_| Err(anyhow!("scrape timed out after {limit:?}"))),
                        None => scrape.await,
                    };
                    (instance.to_string(), result)
                }
                .instrument(span),
            );
            report.spawned += 1;
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((instance, Ok(()))) => {
                debug!(%instance, "scrape finished");
                report.succeeded += 1;
            }
            Ok((instance, Err(e))) => {
                warn!(%instance, error = %e, "scrape failed");
                report.failed += 1;
            }
            Err(e) => {
                error!(error = %e, "scrape task aborted");
                report.failed += 1;
            }
        }
    }

    report
}
