use crate::{
    collectors::{
        Collector,
        sink::{MetricDesc, MetricSink},
    },
    sessions::RequestMetrics,
};
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;

/// Publishes the request counters of the shared transport.
#[derive(Clone, Debug)]
pub struct ClientCollector {
    metrics: RequestMetrics,
}

impl ClientCollector {
    pub const fn new(metrics: RequestMetrics) -> Self {
        Self { metrics }
    }
}

impl Collector for ClientCollector {
    fn name(&self) -> &'static str {
        "client"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        vec![
            MetricDesc::new(
                "rds_exporter_requests_total",
                "Total number of AWS API requests by service, operation and status",
            ),
            MetricDesc::new(
                "rds_exporter_request_duration_seconds",
                "Duration of AWS API requests in seconds",
            ),
        ]
    }

    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.metrics.requests().clone()))?;
        registry.register(Box::new(self.metrics.duration().clone()))?;
        Ok(())
    }

    // counters are updated as requests happen
    fn collect<'a>(&'a self, _sink: &'a MetricSink) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
