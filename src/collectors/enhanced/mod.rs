//! Enhanced Monitoring (OS) metrics.
//!
//! Same fan-out as the basic exporter, limited to instances with enhanced
//! monitoring turned on. One collector serves both `/enhanced` and the
//! filtered `/metrics` endpoint.

mod os_metrics;

pub use os_metrics::{OS_METRICS, OsMetric, OsMetricsScraper, Source};

use crate::{
    collectors::{
        Collector,
        scrape::{FanOut, Scrape, fan_out},
        sink::{MetricDesc, MetricSink},
    },
    sessions::{Instance, SessionPool},
};
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct EnhancedCollector {
    pool: Arc<SessionPool>,
    scraper: Arc<dyn Scrape>,
    metrics: Arc<[MetricDesc]>,
    scrape_timeout: Option<Duration>,
}

impl EnhancedCollector {
    pub fn new(pool: Arc<SessionPool>, scraper: Arc<dyn Scrape>) -> Self {
        Self {
            pool,
            scraper,
            metrics: OS_METRICS.iter().map(MetricDesc::from).collect(),
            scrape_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_scrape_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scrape_timeout = timeout;
        self
    }

    pub async fn collect_into(&self, sink: &MetricSink) -> FanOut {
        let report = fan_out(
            &self.pool,
            &self.scraper,
            &self.metrics,
            sink,
            self.scrape_timeout,
            monitored,
        )
        .await;

        debug!(
            spawned = report.spawned,
            succeeded = report.succeeded,
            failed = report.failed,
            "enhanced collection finished"
        );

        report
    }
}

fn monitored(instance: &Instance) -> bool {
    !instance.disable_enhanced_metrics && !instance.enhanced_monitoring_interval.is_zero()
}

impl Collector for EnhancedCollector {
    fn name(&self) -> &'static str {
        "enhanced"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        self.metrics.to_vec()
    }

    fn register_metrics(&self, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    #[instrument(skip(self, sink), level = "info", fields(collector = "enhanced", otel.kind = "internal"))]
    fn collect<'a>(&'a self, sink: &'a MetricSink) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.collect_into(sink).await;
        })
    }
}
