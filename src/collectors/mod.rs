use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;

use self::sink::{MetricDesc, MetricSink};

#[macro_use]
mod register_macro;

pub trait Collector {
    fn name(&self) -> &'static str;

    /// Every metric name this collector may publish.
    fn describe(&self) -> Vec<MetricDesc>;

    /// Register metrics owned by the collector itself (counters that live
    /// across requests). Collectors that only emit samples do nothing here.
    fn register_metrics(&self, registry: &Registry) -> Result<()>;

    /// Write one collection cycle to `sink`. Failures are logged by the
    /// collector and never abort the request.
    fn collect<'a>(&'a self, sink: &'a MetricSink) -> BoxFuture<'a, ()>;
}

register_collectors! {
    basic => BasicExporter,
    enhanced => EnhancedCollector,
    client => ClientCollector,
}

pub mod factory;
pub mod registry;
pub mod scrape;
pub mod sink;
