//! Basic CloudWatch metrics for every instance in the pool.
//!
//! The exporter fans out one scrape per instance, waits for all of them and
//! then publishes its own `rds_exporter_scrape_duration_seconds`.
//!
//! Metrics in [`metrics::OVERLAPPING_WITH_ENHANCED`] are also published by the
//! enhanced collector. They are only included with [`Overlap::Enabled`], which
//! the collector factory picks when the enhanced collector isn't serving the
//! same request.

mod cloudwatch;
pub mod metrics;

pub use cloudwatch::CloudWatchScraper;

use crate::{
    collectors::{
        Collector,
        scrape::{FanOut, Scrape, fan_out},
        sink::{MetricDesc, MetricSink, Sample},
    },
    sessions::SessionPool,
};
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;
use std::{collections::BTreeSet, sync::Arc, time::Duration, time::Instant};
use tracing::{debug, instrument};

pub const SCRAPE_DURATION_METRIC: &str = "rds_exporter_scrape_duration_seconds";

pub fn scrape_duration_desc() -> MetricDesc {
    MetricDesc::new(
        SCRAPE_DURATION_METRIC,
        "Time this RDS scrape took, in seconds.",
    )
}

/// Whether metrics overlapping with the enhanced collector are published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overlap {
    Enabled,
    #[default]
    Disabled,
}

/// Construction-time options of a [`BasicExporter`].
#[derive(Clone, Debug, Default)]
pub struct ExporterOptions {
    pub overlap: Overlap,
    pub excluded: BTreeSet<String>,
    /// Per-instance deadline. `None` waits for every scrape however long it
    /// takes.
    pub scrape_timeout: Option<Duration>,
}

impl ExporterOptions {
    pub fn new(overlap: Overlap) -> Self {
        Self {
            overlap,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_overlap(mut self, overlap: Overlap) -> Self {
        self.overlap = overlap;
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn with_scrape_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scrape_timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct BasicExporter {
    pool: Arc<SessionPool>,
    scraper: Arc<dyn Scrape>,
    metrics: Arc<[MetricDesc]>,
    options: ExporterOptions,
}

impl BasicExporter {
    pub fn new(pool: Arc<SessionPool>, scraper: Arc<dyn Scrape>, options: ExporterOptions) -> Self {
        let metrics = active_metrics(&options);
        Self {
            pool,
            scraper,
            metrics,
            options,
        }
    }

    /// Drop descriptors by name. Excluded metrics are neither described nor
    /// retrieved; excluding a name twice changes nothing.
    #[must_use]
    pub fn exclude<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = self.options.exclude(names);
        Self {
            metrics: active_metrics(&options),
            options,
            ..self
        }
    }

    pub const fn overlap(&self) -> Overlap {
        self.options.overlap
    }

    pub fn metrics(&self) -> &[MetricDesc] {
        &self.metrics
    }

    /// Scrape every instance into `sink`, then append the cycle duration.
    pub async fn collect_into(&self, sink: &MetricSink) -> FanOut {
        let started = Instant::now();

        let report = fan_out(
            &self.pool,
            &self.scraper,
            &self.metrics,
            sink,
            self.options.scrape_timeout,
            |_| true,
        )
        .await;

        sink.send(Sample::new(
            &scrape_duration_desc(),
            started.elapsed().as_secs_f64(),
        ));

        debug!(
            spawned = report.spawned,
            succeeded = report.succeeded,
            failed = report.failed,
            "basic collection finished"
        );

        report
    }
}

fn active_metrics(options: &ExporterOptions) -> Arc<[MetricDesc]> {
    let overlapping: &[metrics::Metric] = match options.overlap {
        Overlap::Enabled => metrics::OVERLAPPING_WITH_ENHANCED,
        Overlap::Disabled => &[],
    };

    metrics::METRICS
        .iter()
        .chain(overlapping)
        .filter(|m| !options.excluded.contains(m.name))
        .map(MetricDesc::from)
        .collect()
}

impl Collector for BasicExporter {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        self.metrics
            .iter()
            .cloned()
            .chain(std::iter::once(scrape_duration_desc()))
            .collect()
    }

    fn register_metrics(&self, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, sink), level = "info", fields(collector = "basic", otel.kind = "internal"))]
    fn collect<'a>(&'a self, sink: &'a MetricSink) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.collect_into(sink).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{
        Connect, InstanceDirectory, InstancesPage, DescribedInstance, Session, SessionError,
        SessionKey, Transport,
    };
    use crate::{config::InstanceConfig, sessions::Instance};
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AllKnown;

    impl InstanceDirectory for AllKnown {
        fn describe_page<'a>(
            &'a self,
            _marker: Option<&'a str>,
        ) -> BoxFuture<'a, Result<InstancesPage>> {
            Box::pin(async move {
                Ok(InstancesPage {
                    instances: (0..10)
                        .map(|i| DescribedInstance {
                            identifier: format!("db{i}"),
                            resource_id: format!("db-{i}"),
                            monitoring_interval: Duration::from_secs(60),
                        })
                        .collect(),
                    marker: None,
                })
            })
        }
    }

    struct Connector;

    impl Connect for Connector {
        fn connect<'a>(
            &'a self,
            key: &'a SessionKey,
            instance: &'a InstanceConfig,
            transport: &'a Transport,
        ) -> BoxFuture<'a, Result<Session, SessionError>> {
            Box::pin(async move {
                Ok(Session::new(
                    key.clone(),
                    instance.region.clone(),
                    Arc::new(AllKnown),
                    None,
                    transport.clone(),
                ))
            })
        }
    }

    async fn pool(count: usize) -> Arc<SessionPool> {
        let instances: Vec<InstanceConfig> = (0..count)
            .map(|i| InstanceConfig {
                region: if i % 2 == 0 { "us-east-1" } else { "eu-west-1" }.to_string(),
                instance: format!("db{i}"),
                ..InstanceConfig::default()
            })
            .collect();

        Arc::new(
            SessionPool::build_with(&Connector, &instances, &Transport::new(), false)
                .await
                .unwrap(),
        )
    }

    /// Counts invocations and writes one sample per metric.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        seen_metrics: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        panic_on: Option<&'static str>,
        stall_on: Option<&'static str>,
    }

    impl Scrape for Counting {
        fn scrape<'a>(
            &'a self,
            _session: &'a Session,
            instance: &'a Instance,
            metrics: &'a [MetricDesc],
            sink: &'a MetricSink,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.panic_on == Some(instance.name.as_str()) {
                    panic!("scraper blew up");
                }
                if self.stall_on == Some(instance.name.as_str()) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                *self.seen_metrics.lock().unwrap() = metrics.iter().map(|m| m.name.clone()).collect();
                for m in metrics {
                    sink.send(Sample::new(m, 1.0).with_labels(instance.metric_labels()));
                }
                if self.fail_on == Some(instance.name.as_str()) {
                    return Err(anyhow!("throttled"));
                }
                Ok(())
            })
        }
    }

    fn names(descs: &[MetricDesc]) -> Vec<&str> {
        descs.iter().map(|d| d.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_overlap_controls_metric_list() {
        let pool = pool(1).await;
        let scraper: Arc<dyn Scrape> = Arc::new(Counting::default());

        let without = BasicExporter::new(
            Arc::clone(&pool),
            Arc::clone(&scraper),
            ExporterOptions::new(Overlap::Disabled),
        );
        let with = BasicExporter::new(pool, scraper, ExporterOptions::new(Overlap::Enabled));

        assert!(!names(without.metrics()).contains(&"node_cpu_average"));
        assert!(names(with.metrics()).contains(&"node_cpu_average"));
        assert_eq!(
            with.metrics().len(),
            metrics::METRICS.len() + metrics::OVERLAPPING_WITH_ENHANCED.len()
        );
    }

    #[tokio::test]
    async fn test_collect_invokes_scraper_once_per_instance_then_duration() {
        let pool = pool(5).await;
        let counting = Arc::new(Counting::default());
        let exporter = BasicExporter::new(
            pool,
            Arc::clone(&counting) as Arc<dyn Scrape>,
            ExporterOptions::new(Overlap::Disabled),
        );

        let (sink, mut stream) = MetricSink::channel();
        let report = exporter.collect_into(&sink).await;
        let samples = stream.drain();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.spawned, 5);
        assert_eq!(report.succeeded, 5);

        let durations: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.name == SCRAPE_DURATION_METRIC)
            .collect();
        assert_eq!(durations.len(), 1);
        assert_eq!(
            samples.last().map(|s| s.name.as_str()),
            Some(SCRAPE_DURATION_METRIC)
        );
        assert_eq!(samples.len(), 5 * metrics::METRICS.len() + 1);
    }

    #[tokio::test]
    async fn test_failures_and_panics_do_not_block_siblings() {
        let pool = pool(4).await;
        let counting = Arc::new(Counting {
            fail_on: Some("db1"),
            panic_on: Some("db2"),
            ..Counting::default()
        });
        let exporter = BasicExporter::new(
            pool,
            Arc::clone(&counting) as Arc<dyn Scrape>,
            ExporterOptions::new(Overlap::Disabled),
        );

        let (sink, mut stream) = MetricSink::channel();
        let report = exporter.collect_into(&sink).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.spawned, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(
            stream.drain().last().map(|s| s.name.clone()),
            Some(SCRAPE_DURATION_METRIC.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_timeout_abandons_stalled_instance() {
        let pool = pool(3).await;
        let counting = Arc::new(Counting {
            stall_on: Some("db0"),
            ..Counting::default()
        });
        let exporter = BasicExporter::new(
            pool,
            Arc::clone(&counting) as Arc<dyn Scrape>,
            ExporterOptions::new(Overlap::Disabled)
                .with_scrape_timeout(Some(Duration::from_secs(10))),
        );

        let (sink, _stream) = MetricSink::channel();
        let report = exporter.collect_into(&sink).await;

        assert_eq!(report.spawned, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_exclude_removes_descriptor_and_value() {
        let pool = pool(1).await;
        let counting = Arc::new(Counting::default());
        let exporter = BasicExporter::new(
            pool,
            Arc::clone(&counting) as Arc<dyn Scrape>,
            ExporterOptions::new(Overlap::Enabled),
        )
        .exclude(["node_cpu_average"]);

        let described = exporter.describe();
        assert!(!names(&described).contains(&"node_cpu_average"));
        assert!(names(&described).contains(&"node_memory_mem_free_bytes"));
        assert!(names(&described).contains(&SCRAPE_DURATION_METRIC));

        let (sink, mut stream) = MetricSink::channel();
        exporter.collect_into(&sink).await;
        assert!(stream.drain().iter().all(|s| s.name != "node_cpu_average"));
        assert!(
            !counting
                .seen_metrics
                .lock()
                .unwrap()
                .contains(&"node_cpu_average".to_string())
        );

        let before = exporter.metrics().len();
        let again = exporter.exclude(["node_cpu_average"]);
        assert_eq!(again.metrics().len(), before);
    }

    #[tokio::test]
    async fn test_empty_pool_still_reports_duration() {
        let exporter = BasicExporter::new(
            Arc::new(SessionPool::default()),
            Arc::new(Counting::default()),
            ExporterOptions::default(),
        );

        let (sink, mut stream) = MetricSink::channel();
        let report = exporter.collect_into(&sink).await;

        assert_eq!(report.spawned, 0);
        let samples = stream.drain();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, SCRAPE_DURATION_METRIC);
    }

    #[test]
    fn test_options_exclude_accumulates() {
        let options = ExporterOptions::default()
            .exclude(["a"])
            .exclude(vec!["b".to_string(), "a".to_string()]);
        assert_eq!(options.excluded.len(), 2);
        assert_eq!(options.overlap, Overlap::Disabled);
    }
}
