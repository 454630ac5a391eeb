use crate::{
    collectors::{
        scrape::Scrape,
        sink::{MetricDesc, MetricSink, Sample},
    },
    sessions::{Instance, Session},
};
use anyhow::{Context, Result, anyhow};
use aws_sdk_cloudwatchlogs::{Client, error::DisplayErrorContext};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

const LOG_GROUP: &str = "RDSOSMetrics";

/// Where a metric's value is found in an `RDSOSMetrics` document. Values
/// reported in KiB carry a scale of 1024.
#[derive(Clone, Copy, Debug)]
pub enum Source {
    Field(&'static str),
    Difference(&'static str, &'static str),
}

#[derive(Clone, Copy, Debug)]
pub struct OsMetric {
    pub name: &'static str,
    pub help: &'static str,
    pub source: Source,
    pub scale: f64,
}

impl OsMetric {
    fn value(&self, document: &Value) -> Option<f64> {
        let raw = match self.source {
            Source::Field(pointer) => field(document, pointer)?,
            Source::Difference(a, b) => field(document, a)? - field(document, b)?,
        };
        Some(raw * self.scale)
    }
}

impl From<&OsMetric> for MetricDesc {
    fn from(metric: &OsMetric) -> Self {
        let desc = Self::new(metric.name, metric.help);
        match metric.source {
            Source::Field(pointer) => desc.with_source(pointer),
            Source::Difference(..) => desc,
        }
    }
}

fn field(document: &Value, pointer: &str) -> Option<f64> {
    document.pointer(pointer).and_then(Value::as_f64)
}

const KIB: f64 = 1024.0;

pub const OS_METRICS: &[OsMetric] = &[
    OsMetric {
        name: "node_cpu_average",
        help: "The percentage of CPU utilization.",
        source: Source::Field("/cpuUtilization/total"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_cpu_count",
        help: "The number of virtual CPUs for the DB instance.",
        source: Source::Field("/numVCPUs"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_load1",
        help: "The number of processes requesting CPU time over the last minute.",
        source: Source::Field("/loadAverageMinute/one"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_load5",
        help: "The number of processes requesting CPU time over the last 5 minutes.",
        source: Source::Field("/loadAverageMinute/five"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_load15",
        help: "The number of processes requesting CPU time over the last 15 minutes.",
        source: Source::Field("/loadAverageMinute/fifteen"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_memory_mem_free_bytes",
        help: "The amount of unassigned memory.",
        source: Source::Field("/memory/free"),
        scale: KIB,
    },
    OsMetric {
        name: "node_memory_mem_total_bytes",
        help: "The total amount of memory.",
        source: Source::Field("/memory/total"),
        scale: KIB,
    },
    OsMetric {
        name: "node_memory_swap_used_bytes",
        help: "The amount of swap memory in use.",
        source: Source::Difference("/swap/total", "/swap/free"),
        scale: KIB,
    },
    OsMetric {
        name: "node_procs_running",
        help: "The number of running tasks.",
        source: Source::Field("/tasks/running"),
        scale: 1.0,
    },
    OsMetric {
        name: "node_procs_blocked",
        help: "The number of tasks that are blocked.",
        source: Source::Field("/tasks/blocked"),
        scale: 1.0,
    },
];

/// Samples for every requested metric present in `document`. Missing or
/// non-numeric fields are skipped.
pub fn samples(document: &Value, metrics: &[MetricDesc]) -> Vec<Sample> {
    metrics
        .iter()
        .filter_map(|desc| {
            let metric = OS_METRICS.iter().find(|m| m.name == desc.name)?;
            Some(Sample::new(desc, metric.value(document)?))
        })
        .collect()
}

/// Reads the newest `RDSOSMetrics` event of an instance from CloudWatch Logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsMetricsScraper;

impl OsMetricsScraper {
    pub const fn new() -> Self {
        Self
    }
}

impl Scrape for OsMetricsScraper {
    fn scrape<'a>(
        &'a self,
        session: &'a Session,
        instance: &'a Instance,
        metrics: &'a [MetricDesc],
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let config = session
                .sdk_config()
                .ok_or_else(|| anyhow!("session {} has no AWS configuration", session.key()))?;
            let client = Client::new(config);

            let started = Instant::now();
            let output = client
                .get_log_events()
                .log_group_name(LOG_GROUP)
                .log_stream_name(instance.resource_id.as_str())
                .start_from_head(false)
                .limit(1)
                .send()
                .instrument(info_span!("logs.get_log_events", otel.kind = "client"))
                .await;

            session.transport().metrics().observe(
                "logs",
                "GetLogEvents",
                output.is_ok(),
                started.elapsed(),
            );

            let output = output.map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;

            let Some(message) = output.events().last().and_then(|e| e.message()) else {
                debug!(%instance, "no RDSOSMetrics events");
                return Ok(());
            };

            let document: Value = serde_json::from_str(message)
                .with_context(|| format!("invalid RDSOSMetrics document for {instance}"))?;

            let labels = instance.metric_labels();
            for sample in samples(&document, metrics) {
                sink.send(sample.with_labels(labels.clone()));
            }

            Ok(())
        })
    }
}
