use aws_config::timeout::TimeoutConfig;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every session: timeouts applied to each SDK client and
/// the request counters exposed by the `client` collector.
#[derive(Clone, Debug)]
pub struct Transport {
    connect_timeout: Duration,
    operation_timeout: Duration,
    metrics: RequestMetrics,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            metrics: RequestMetrics::new(),
        }
    }

    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, operation: Duration) -> Self {
        self.connect_timeout = connect;
        self.operation_timeout = operation;
        self
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::builder()
            .connect_timeout(self.connect_timeout)
            .operation_timeout(self.operation_timeout)
            .build()
    }

    pub const fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }
}

/// Counters for every remote call made on behalf of a session.
///
/// - `rds_exporter_requests_total{service,operation,status}` (Counter)
/// - `rds_exporter_request_duration_seconds{service,operation}` (Histogram)
#[derive(Clone, Debug)]
pub struct RequestMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let requests = IntCounterVec::new(
            Opts::new(
                "rds_exporter_requests_total",
                "Total number of AWS API requests by service, operation and status",
            ),
            &["service", "operation", "status"],
        )
        .expect("rds_exporter_requests_total");

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "rds_exporter_request_duration_seconds",
                "Duration of AWS API requests in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["service", "operation"],
        )
        .expect("rds_exporter_request_duration_seconds");

        Self { requests, duration }
    }

    pub fn observe(&self, service: &str, operation: &str, success: bool, elapsed: Duration) {
        let status = if success { "ok" } else { "error" };
        self.requests
            .with_label_values(&[service, operation, status])
            .inc();
        self.duration
            .with_label_values(&[service, operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn count(&self, service: &str, operation: &str, status: &str) -> u64 {
        self.requests
            .with_label_values(&[service, operation, status])
            .get()
    }

    pub(crate) fn requests(&self) -> &IntCounterVec {
        &self.requests
    }

    pub(crate) fn duration(&self) -> &HistogramVec {
        &self.duration
    }
}
