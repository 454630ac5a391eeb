use crate::collectors::{
    Collector, CollectorType,
    sink::{MetricSink, Sample},
};
use anyhow::{Result, bail};
use futures::stream::{FuturesUnordered, StreamExt};
use prometheus::{Encoder as _, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

/// Collectors serving a single HTTP request.
///
/// Registration rejects a collector whose name or any of whose metric names
/// is already taken, the same way a Prometheus registry refuses duplicate
/// descriptors.
pub struct CollectorSet {
    collectors: Vec<CollectorType>,
    metric_names: HashSet<String>,
    registry: Registry,
}

impl Default for CollectorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorSet {
    pub fn new() -> Self {
        Self {
            collectors: Vec::new(),
            metric_names: HashSet::new(),
            registry: Registry::new(),
        }
    }

    /// Add the exporter's own process metrics (Linux only).
    ///
    /// # Errors
    ///
    /// Returns an error if the process collector can't be registered
    pub fn with_process_metrics(self) -> Result<Self> {
        #[cfg(target_os = "linux")]
        self.registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the collector, or one of its metrics, is already
    /// registered
    pub fn register(&mut self, collector: CollectorType) -> Result<()> {
        let name = collector.name();

        if self.collectors.iter().any(|c| c.name() == name) {
            bail!("collector {name:?} is already registered");
        }

        let described = collector.describe();
        let mut seen = HashSet::new();
        for desc in &described {
            if self.metric_names.contains(&desc.name) || !seen.insert(desc.name.as_str()) {
                bail!(
                    "duplicate metrics collector registration attempted: {} ({name})",
                    desc.name
                );
            }
        }

        collector.register_metrics(&self.registry)?;

        self.metric_names
            .extend(described.into_iter().map(|desc| desc.name));
        self.collectors.push(collector);

        debug!(collector = name, "collector registered");

        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(Collector::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run every collector concurrently and render the result in the
    /// Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if the samples can't be encoded
    pub async fn gather(&self) -> Result<String> {
        let (sink, mut stream) = MetricSink::channel();

        let mut tasks = self
            .collectors
            .iter()
            .map(|collector| {
                let span = info_span!(
                    "collector.collect",
                    collector = %collector.name(),
                    otel.kind = "internal"
                );
                collector.collect(&sink).instrument(span)
            })
            .collect::<FuturesUnordered<_>>();

        while tasks.next().await.is_some() {}
        drop(tasks);

        render(&self.registry, stream.drain())
    }
}

/// Render `samples` together with the metrics registered in `registry`.
///
/// Samples are grouped by name into gauges. A gauge's label names are the
/// union over its samples; a sample without one of them renders it empty.
pub(crate) fn render(registry: &Registry, samples: Vec<Sample>) -> Result<String> {
    let mut grouped: BTreeMap<String, (String, Vec<Sample>)> = BTreeMap::new();
    for sample in samples {
        grouped
            .entry(sample.name.clone())
            .or_insert_with(|| (sample.help.clone(), Vec::new()))
            .1
            .push(sample);
    }

    let gauges = Registry::new();
    for (name, (help, samples)) in grouped {
        let label_names: BTreeSet<&str> = samples
            .iter()
            .flat_map(|s| s.labels.keys().map(String::as_str))
            .collect();
        let label_names: Vec<&str> = label_names.into_iter().collect();

        let gauge = GaugeVec::new(Opts::new(name, help), &label_names)?;
        for sample in &samples {
            let values: Vec<&str> = label_names
                .iter()
                .map(|label| sample.labels.get(*label).map_or("", String::as_str))
                .collect();
            gauge.with_label_values(&values).set(sample.value);
        }

        gauges.register(Box::new(gauge))?;
    }

    let mut families = registry.gather();
    families.extend(gauges.gather());

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collectors::{
            BasicExporter, ClientCollector, EnhancedCollector,
            basic::{CloudWatchScraper, ExporterOptions, Overlap, SCRAPE_DURATION_METRIC},
            enhanced::OsMetricsScraper,
            sink::MetricDesc,
        },
        sessions::{RequestMetrics, SessionPool},
    };
    use std::{sync::Arc, time::Duration};

    fn basic(overlap: Overlap) -> CollectorType {
        BasicExporter::new(
            Arc::new(SessionPool::default()),
            Arc::new(CloudWatchScraper::new()),
            ExporterOptions::new(overlap),
        )
        .into()
    }

    fn enhanced() -> CollectorType {
        EnhancedCollector::new(
            Arc::new(SessionPool::default()),
            Arc::new(OsMetricsScraper::new()),
        )
        .into()
    }

    #[test]
    fn test_duplicate_collector_is_rejected() {
        let metrics = RequestMetrics::new();
        let mut set = CollectorSet::new();

        set.register(ClientCollector::new(metrics.clone()).into())
            .unwrap();
        let err = set
            .register(ClientCollector::new(metrics).into())
            .unwrap_err();

        assert!(err.to_string().contains("already registered"));
        assert_eq!(set.names(), vec!["client"]);
    }

    #[test]
    fn test_overlapping_metrics_are_rejected() {
        let mut set = CollectorSet::new();
        set.register(basic(Overlap::Enabled)).unwrap();

        let err = set.register(enhanced()).unwrap_err();

        assert!(err.to_string().contains("duplicate metrics collector registration"));
        assert_eq!(set.names(), vec!["basic"]);
    }

    #[test]
    fn test_basic_without_overlap_coexists_with_enhanced() {
        let mut set = CollectorSet::new();
        set.register(basic(Overlap::Disabled)).unwrap();
        set.register(enhanced()).unwrap();
        assert_eq!(set.names(), vec!["basic", "enhanced"]);
    }

    #[test]
    fn test_render_merges_label_sets() {
        let desc = MetricDesc::new("aws_rds_test_average", "Test metric.");
        let samples = vec![
            Sample::new(&desc, 1.0).with_labels(BTreeMap::from([
                ("instance".to_string(), "db1".to_string()),
                ("region".to_string(), "us-east-1".to_string()),
            ])),
            Sample::new(&desc, 2.0).with_labels(BTreeMap::from([
                ("instance".to_string(), "db2".to_string()),
                ("region".to_string(), "us-east-1".to_string()),
                ("team".to_string(), "core".to_string()),
            ])),
        ];

        let output = render(&Registry::new(), samples).unwrap();

        assert!(output.contains("# HELP aws_rds_test_average Test metric."));
        assert!(output.contains("# TYPE aws_rds_test_average gauge"));
        assert!(output.contains(
            r#"aws_rds_test_average{instance="db1",region="us-east-1",team=""} 1"#
        ));
        assert!(output.contains(
            r#"aws_rds_test_average{instance="db2",region="us-east-1",team="core"} 2"#
        ));
    }

    #[test]
    fn test_render_includes_registered_metrics() {
        let metrics = RequestMetrics::new();
        let registry = Registry::new();
        ClientCollector::new(metrics.clone())
            .register_metrics(&registry)
            .unwrap();
        metrics.observe("rds", "DescribeDBInstances", true, Duration::ZERO);

        let output = render(&registry, Vec::new()).unwrap();

        assert!(output.contains("rds_exporter_requests_total"));
    }

    #[tokio::test]
    async fn test_gather_runs_every_collector() {
        let mut set = CollectorSet::new();
        set.register(basic(Overlap::Enabled)).unwrap();
        set.register(ClientCollector::new(RequestMetrics::new()).into())
            .unwrap();

        let output = set.gather().await.unwrap();

        assert!(output.contains(&format!("# TYPE {SCRAPE_DURATION_METRIC} gauge")));
    }

    #[tokio::test]
    #[cfg(target_os = "linux")]
    async fn test_process_metrics() {
        let set = CollectorSet::new().with_process_metrics().unwrap();
        let output = set.gather().await.unwrap();
        assert!(output.contains("process_"));
    }
}
