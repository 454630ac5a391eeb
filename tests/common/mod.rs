#![allow(dead_code)]

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use rds_exporter::{
    collectors::{
        basic::ExporterOptions,
        scrape::Scrape,
        sink::{MetricDesc, MetricSink, Sample},
    },
    config::InstanceConfig,
    exporter::{MetricsState, router},
    sessions::{
        Connect, DescribedInstance, Instance, InstanceDirectory, InstancesPage, Session,
        SessionError, SessionKey, SessionPool, Transport,
    },
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};

/// Instances known to the fake RDS backend: name, resource ID and enhanced
/// monitoring interval in seconds.
pub const KNOWN: &[(&str, &str, u64)] = &[
    ("db-primary", "db-AAAA", 60),
    ("db-replica", "db-BBBB", 0),
    ("db-reports", "db-CCCC", 15),
];

struct FakeDirectory;

impl InstanceDirectory for FakeDirectory {
    fn describe_page<'a>(
        &'a self,
        _marker: Option<&'a str>,
    ) -> BoxFuture<'a, Result<InstancesPage>> {
        Box::pin(async {
            Ok(InstancesPage {
                instances: KNOWN
                    .iter()
                    .map(|(name, rid, interval)| DescribedInstance {
                        identifier: (*name).to_string(),
                        resource_id: (*rid).to_string(),
                        monitoring_interval: Duration::from_secs(*interval),
                    })
                    .collect(),
                marker: None,
            })
        })
    }
}

/// Sessions backed by [`FakeDirectory`] instead of AWS.
pub struct FakeConnector;

impl Connect for FakeConnector {
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
                Arc::new(FakeDirectory),
                None,
                transport.clone(),
            ))
        })
    }
}

/// Writes `value` for every requested metric, labelled like the real
/// scrapers. Fails for instances named in `fail_on`.
pub struct FixedScraper {
    pub value: f64,
    pub fail_on: Vec<String>,
}

impl FixedScraper {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            fail_on: Vec::new(),
        }
    }
}

impl Scrape for FixedScraper {
    fn scrape<'a>(
        &'a self,
        _session: &'a Session,
        instance: &'a Instance,
        metrics: &'a [MetricDesc],
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail_on.contains(&instance.name) {
                return Err(anyhow!("throttled"));
            }
            for desc in metrics {
                sink.send(Sample::new(desc, self.value).with_labels(instance.metric_labels()));
            }
            Ok(())
        })
    }
}

pub fn instance(region: &str, name: &str) -> InstanceConfig {
    InstanceConfig {
        region: region.to_string(),
        instance: name.to_string(),
        ..InstanceConfig::default()
    }
}

/// Catalog used by most tests: two regions, one unknown instance that gets
/// pruned, catalog labels on the primary.
pub fn catalog() -> Vec<InstanceConfig> {
    let mut primary = instance("us-east-1", "db-primary");
    primary.labels = BTreeMap::from([("team".to_string(), "core".to_string())]);

    vec![
        primary,
        instance("us-east-1", "db-replica"),
        instance("eu-west-1", "db-reports"),
        instance("eu-west-1", "db-gone"),
    ]
}

pub async fn pool(catalog: &[InstanceConfig], transport: &Transport) -> Result<Arc<SessionPool>> {
    Ok(Arc::new(
        SessionPool::build_with(&FakeConnector, catalog, transport, false).await?,
    ))
}

pub async fn state(options: ExporterOptions) -> Result<MetricsState> {
    let transport = Transport::new();
    let pool = pool(&catalog(), &transport).await?;

    Ok(MetricsState::new(
        pool,
        Arc::new(FixedScraper::new(1.0)),
        Arc::new(FixedScraper::new(2.0)),
        transport.metrics().clone(),
        options,
    ))
}

/// Serve the application routes on an ephemeral port.
pub async fn serve(state: MetricsState) -> Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(state, "/basic", "/enhanced");

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });

    Ok((format!("http://{addr}"), handle))
}

pub async fn get(url: &str) -> Result<(u16, String)> {
    let response = reqwest::get(url).await?;
    let status = response.status().as_u16();
    Ok((status, response.text().await?))
}

/// Sample lines (not comments) of the metric `name`.
pub fn samples<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .collect()
}
