use crate::{
    collectors::{
        BasicExporter, Collector, CollectorType,
        basic::{ExporterOptions, Overlap},
        scrape::Scrape,
    },
    sessions::SessionPool,
};
use std::{collections::BTreeMap, sync::Arc};

/// Builds the collectors serving one filtered `/metrics` request.
///
/// The basic exporter is created per request because whether it includes
/// the metrics overlapping with `enhanced` depends on the filter list.
/// Predefined collectors are shared by every request.
#[derive(Clone)]
pub struct Factory {
    pool: Arc<SessionPool>,
    scraper: Arc<dyn Scrape>,
    options: ExporterOptions,
    predefined: Vec<CollectorType>,
}

impl Factory {
    pub fn new(pool: Arc<SessionPool>, scraper: Arc<dyn Scrape>, options: ExporterOptions) -> Self {
        Self {
            pool,
            scraper,
            options,
            predefined: Vec::new(),
        }
    }

    /// Add a collector created once at startup and shared by every request.
    #[must_use]
    pub fn with_predefined(mut self, collector: impl Into<CollectorType>) -> Self {
        self.predefined.push(collector.into());
        self
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn basic(&self, overlap: Overlap) -> BasicExporter {
        BasicExporter::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.scraper),
            self.options.clone().with_overlap(overlap),
        )
    }

    /// Collectors by name for the given `collect[]` filters.
    ///
    /// - no filters: basic without overlap, plus every predefined collector
    /// - only `basic`: basic with overlap, nothing else
    /// - `basic` among others: basic without overlap when `enhanced` is also
    ///   requested, with it otherwise, plus every predefined collector
    /// - anything else: the predefined collectors
    pub fn create(&self, filters: &[String]) -> BTreeMap<&'static str, CollectorType> {
        let mut collectors: BTreeMap<&'static str, CollectorType> = BTreeMap::new();
        let requested = |name: &str| filters.iter().any(|f| f == name);

        match filters.len() {
            0 => {
                collectors.insert("basic", self.basic(Overlap::Disabled).into());
            }
            1 if requested("basic") => {
                collectors.insert("basic", self.basic(Overlap::Enabled).into());
                return collectors;
            }
            _ if requested("basic") => {
                let overlap = if requested("enhanced") {
                    Overlap::Disabled
                } else {
                    Overlap::Enabled
                };
                collectors.insert("basic", self.basic(overlap).into());
            }
            _ => {}
        }

        for collector in &self.predefined {
            collectors.insert(collector.name(), collector.clone());
        }

        collectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collectors::{
            ClientCollector, EnhancedCollector, basic::CloudWatchScraper,
            enhanced::OsMetricsScraper,
        },
        sessions::RequestMetrics,
    };

    fn factory() -> Factory {
        let pool = Arc::new(SessionPool::default());
        Factory::new(
            Arc::clone(&pool),
            Arc::new(CloudWatchScraper::new()),
            ExporterOptions::default(),
        )
        .with_predefined(EnhancedCollector::new(pool, Arc::new(OsMetricsScraper::new())))
        .with_predefined(ClientCollector::new(RequestMetrics::new()))
    }

    fn filters(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn basic_overlap(collectors: &BTreeMap<&'static str, CollectorType>) -> Option<Overlap> {
        match collectors.get("basic") {
            Some(CollectorType::BasicExporter(basic)) => Some(basic.overlap()),
            _ => None,
        }
    }

    fn names(collectors: &BTreeMap<&'static str, CollectorType>) -> Vec<&'static str> {
        collectors.keys().copied().collect()
    }

    #[test]
    fn test_no_filters() {
        let collectors = factory().create(&[]);
        assert_eq!(names(&collectors), vec!["basic", "client", "enhanced"]);
        assert_eq!(basic_overlap(&collectors), Some(Overlap::Disabled));
    }

    #[test]
    fn test_only_basic() {
        let collectors = factory().create(&filters(&["basic"]));
        assert_eq!(names(&collectors), vec!["basic"]);
        assert_eq!(basic_overlap(&collectors), Some(Overlap::Enabled));
    }

    #[test]
    fn test_basic_and_enhanced() {
        let collectors = factory().create(&filters(&["basic", "enhanced"]));
        assert_eq!(names(&collectors), vec!["basic", "client", "enhanced"]);
        assert_eq!(basic_overlap(&collectors), Some(Overlap::Disabled));
    }

    #[test]
    fn test_basic_and_client() {
        let collectors = factory().create(&filters(&["basic", "client"]));
        assert_eq!(names(&collectors), vec!["basic", "client", "enhanced"]);
        assert_eq!(basic_overlap(&collectors), Some(Overlap::Enabled));
    }

    #[test]
    fn test_without_basic() {
        let collectors = factory().create(&filters(&["enhanced"]));
        assert_eq!(names(&collectors), vec!["client", "enhanced"]);
        assert_eq!(basic_overlap(&collectors), None);
    }

    #[test]
    fn test_unknown_filter() {
        let collectors = factory().create(&filters(&["nope"]));
        assert_eq!(names(&collectors), vec!["client", "enhanced"]);
    }

    #[test]
    fn test_basic_keeps_exclusions() {
        let pool = Arc::new(SessionPool::default());
        let factory = Factory::new(
            pool,
            Arc::new(CloudWatchScraper::new()),
            ExporterOptions::default().exclude(["aws_rds_deadlocks_average"]),
        );

        let basic = factory.basic(Overlap::Enabled);
        assert!(basic.metrics().iter().all(|m| m.name != "aws_rds_deadlocks_average"));
        assert!(basic.metrics().iter().any(|m| m.name == "node_cpu_average"));
    }
}
