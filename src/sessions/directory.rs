use crate::sessions::transport::RequestMetrics;
use anyhow::{Result, anyhow};
use aws_sdk_rds::error::DisplayErrorContext;
use futures::future::BoxFuture;
use std::time::{Duration, Instant};

/// An instance as reported by the remote backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescribedInstance {
    pub identifier: String,
    pub resource_id: String,
    pub monitoring_interval: Duration,
}

/// One page of a paginated lookup. `marker` is `None` on the last page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstancesPage {
    pub instances: Vec<DescribedInstance>,
    pub marker: Option<String>,
}

/// Paginated "describe instances" lookup bound to one session's credentials.
pub trait InstanceDirectory: Send + Sync {
    fn describe_page<'a>(&'a self, marker: Option<&'a str>) -> BoxFuture<'a, Result<InstancesPage>>;
}

/// `DescribeDBInstances` through the RDS API.
pub struct RdsDirectory {
    client: aws_sdk_rds::Client,
    metrics: RequestMetrics,
}

impl RdsDirectory {
    pub fn new(config: &aws_config::SdkConfig, metrics: RequestMetrics) -> Self {
        Self {
            client: aws_sdk_rds::Client::new(config),
            metrics,
        }
    }
}

impl InstanceDirectory for RdsDirectory {
    fn describe_page<'a>(&'a self, marker: Option<&'a str>) -> BoxFuture<'a, Result<InstancesPage>> {
        Box::pin(async move {
            let started = Instant::now();

            let output = self
                .client
                .describe_db_instances()
                .set_marker(marker.map(str::to_string))
                .send()
                .await;

            self.metrics.observe(
                "rds",
                "DescribeDBInstances",
                output.is_ok(),
                started.elapsed(),
            );

            let output = output.map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;

            let instances = output
                .db_instances()
                .iter()
                .filter_map(|db| {
                    Some(DescribedInstance {
                        identifier: db.db_instance_identifier()?.to_string(),
                        resource_id: db.dbi_resource_id().unwrap_or_default().to_string(),
                        monitoring_interval: Duration::from_secs(
                            db.monitoring_interval()
                                .and_then(|s| u64::try_from(s).ok())
                                .unwrap_or_default(),
                        ),
                    })
                })
                .collect();

            Ok(InstancesPage {
                instances,
                marker: output.marker().map(str::to_string),
            })
        })
    }
}
