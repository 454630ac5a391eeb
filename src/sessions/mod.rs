//! Shared AWS sessions and the instances they serve.
//!
//! Instances sharing a region and an access key (or both using the default
//! credential chain) share one [`Session`]. The pool is built once at startup,
//! resolves every instance's `DbiResourceId` through a paginated
//! `DescribeDBInstances` lookup, drops the instances it can't resolve, and is
//! read-only afterwards. Scrape tasks read it concurrently through an `Arc`
//! without any locking.

pub mod credentials;
pub mod directory;
pub mod transport;

pub use directory::{DescribedInstance, InstanceDirectory, InstancesPage, RdsDirectory};
pub use transport::{RequestMetrics, Transport};

use crate::config::InstanceConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_rds::config::Region;
use credentials::CredentialHandle;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    env, fmt,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info, instrument};

/// Environment variable that marks a continuous-integration run.
pub const CI_ENV: &str = "CI";

#[allow(clippy::expect_used)]
static INVALID_LABEL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-zA-Z0-9_]").expect("valid label regex"));

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("can't build credentials for {instance}: {reason}")]
    Credential { instance: String, reason: String },

    #[error(
        "refusing to enable AWS request tracing with {CI_ENV} set: output would contain credentials"
    )]
    TracingOnCi,

    #[error("can't create session {key}: {reason}")]
    Connect { key: String, reason: String },
}

/// Dedup key of a session: `region/access-key`, the key being empty for the
/// default credential chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(region: &str, access_key: &str) -> Self {
        Self(format!("{region}/{access_key}"))
    }

    pub fn for_instance(instance: &InstanceConfig) -> Self {
        Self::new(&instance.region, instance.access_key())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keys never leave the process, but keep them out of logs anyway
        match self.0.split_once('/') {
            Some((region, key)) if !key.is_empty() => {
                write!(f, "{region}/{}…", key.get(..4).unwrap_or(key))
            }
            _ => f.write_str(&self.0),
        }
    }
}

/// A single RDS instance at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instance {
    pub region: String,
    pub name: String,
    pub resource_id: String,
    pub labels: BTreeMap<String, String>,
    pub disable_basic_metrics: bool,
    pub disable_enhanced_metrics: bool,
    pub enhanced_monitoring_interval: Duration,
}

impl From<&InstanceConfig> for Instance {
    fn from(config: &InstanceConfig) -> Self {
        Self {
            region: config.region.clone(),
            name: config.instance.clone(),
            resource_id: String::new(),
            labels: config.labels.clone(),
            disable_basic_metrics: config.disable_basic_metrics,
            disable_enhanced_metrics: config.disable_enhanced_metrics,
            enhanced_monitoring_interval: Duration::ZERO,
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.name)?;
        if !self.resource_id.is_empty() {
            write!(f, " ({})", self.resource_id)?;
        }
        Ok(())
    }
}

impl Instance {
    pub fn is_resolved(&self) -> bool {
        !self.resource_id.is_empty()
    }

    /// Labels attached to every sample of this instance: `instance`, `region`
    /// and the catalog labels with names made safe for Prometheus.
    pub fn metric_labels(&self) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<String, String> = self
            .labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();
        labels.insert("instance".to_string(), self.name.clone());
        labels.insert("region".to_string(), self.region.clone());
        labels
    }
}

fn sanitize_label_name(name: &str) -> String {
    let cleaned = INVALID_LABEL_CHARS.replace_all(name, "_");
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) || cleaned.is_empty() {
        format!("_{cleaned}")
    } else {
        cleaned.into_owned()
    }
}

/// Authenticated, region-scoped handle shared by instances with the same
/// credentials.
pub struct Session {
    key: SessionKey,
    region: String,
    directory: Arc<dyn InstanceDirectory>,
    sdk_config: Option<SdkConfig>,
    transport: Transport,
    traced: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key.to_string())
            .field("region", &self.region)
            .field("traced", &self.traced)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        key: SessionKey,
        region: impl Into<String>,
        directory: Arc<dyn InstanceDirectory>,
        sdk_config: Option<SdkConfig>,
        transport: Transport,
    ) -> Self {
        Self {
            key,
            region: region.into(),
            directory,
            sdk_config,
            transport,
            traced: false,
        }
    }

    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// SDK configuration scrapers build their service clients from. `None`
    /// for sessions that aren't backed by AWS.
    pub const fn sdk_config(&self) -> Option<&SdkConfig> {
        self.sdk_config.as_ref()
    }

    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    pub const fn traced(&self) -> bool {
        self.traced
    }

    pub fn directory(&self) -> &dyn InstanceDirectory {
        self.directory.as_ref()
    }
}

/// Creates sessions for the pool. [`AwsConnector`] is the production
/// implementation; tests provide their own.
pub trait Connect: Sync {
    fn connect<'a>(
        &'a self,
        key: &'a SessionKey,
        instance: &'a InstanceConfig,
        transport: &'a Transport,
    ) -> BoxFuture<'a, Result<Session, SessionError>>;
}

pub struct AwsConnector;

impl Connect for AwsConnector {
    fn connect<'a>(
        &'a self,
        key: &'a SessionKey,
        instance: &'a InstanceConfig,
        transport: &'a Transport,
    ) -> BoxFuture<'a, Result<Session, SessionError>> {
        Box::pin(async move {
            let handle = credentials::resolve(instance).await?;
            debug!(key = %key, credentials = ?handle, "creating session");

            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(instance.region.clone()))
                .timeout_config(transport.timeout_config());

            loader = match handle {
                CredentialHandle::AssumeRole(provider) => loader.credentials_provider(provider),
                CredentialHandle::Static(creds) => loader.credentials_provider(creds),
                CredentialHandle::DefaultChain => loader,
            };

            let config = loader.load().await;

            if config.region().is_none() {
                return Err(SessionError::Connect {
                    key: key.to_string(),
                    reason: "no region configured".to_string(),
                });
            }

            let directory = Arc::new(RdsDirectory::new(&config, transport.metrics().clone()));

            Ok(Session::new(
                key.clone(),
                instance.region.clone(),
                directory,
                Some(config),
                transport.clone(),
            ))
        })
    }
}

/// Refuse verbose request tracing on CI, where logs are often public.
///
/// # Errors
///
/// Returns [`SessionError::TracingOnCi`] when `trace` is set and the `CI`
/// environment variable is present.
pub fn check_trace_allowed(trace: bool) -> Result<(), SessionError> {
    if trace && env::var_os(CI_ENV).is_some() {
        return Err(SessionError::TracingOnCi);
    }
    Ok(())
}

/// Resolve resource IDs for `instances` by paging through the session's
/// directory. Returns the number of pages fetched.
///
/// Only adds information: instances that aren't matched keep what they had.
/// A failing page stops pagination for this session and keeps the partial
/// results. A marker that was already seen also stops pagination.
pub async fn resolve_resource_ids(session: &Session, instances: &mut [Instance]) -> usize {
    let mut marker: Option<String> = None;
    let mut seen = HashSet::new();
    let mut pages = 0;

    loop {
        let page = match session.directory().describe_page(marker.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                error!(session = %session.key(), error = %e, "failed to get resource IDs");
                break;
            }
        };
        pages += 1;

        if session.traced() {
            debug!(session = %session.key(), page = ?page, "DescribeDBInstances response");
        }

        for described in &page.instances {
            for instance in instances.iter_mut().filter(|i| i.name == described.identifier) {
                instance.resource_id.clone_from(&described.resource_id);
                instance.enhanced_monitoring_interval = described.monitoring_interval;
            }
        }

        match page.marker {
            Some(next) if seen.insert(next.clone()) => marker = Some(next),
            Some(next) => {
                error!(session = %session.key(), marker = %next, "backend repeated a pagination marker");
                break;
            }
            None => break,
        }
    }

    pages
}

struct PoolEntry {
    session: Arc<Session>,
    instances: Vec<Arc<Instance>>,
}

/// Sessions and the resolved instances each one serves.
///
/// Every session serves at least one instance, and every instance has a
/// resource ID.
#[derive(Default)]
pub struct SessionPool {
    entries: Vec<PoolEntry>,
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.entries.len())
            .field("instances", &self.len())
            .finish()
    }
}

impl SessionPool {
    /// Build the pool against AWS.
    ///
    /// # Errors
    ///
    /// Returns an error if tracing is requested on CI or if credentials or a
    /// session can't be created for any instance. Lookup failures aren't
    /// errors: unresolved instances are dropped.
    pub async fn build(
        instances: &[InstanceConfig],
        transport: &Transport,
        trace: bool,
    ) -> Result<Self, SessionError> {
        Self::build_with(&AwsConnector, instances, transport, trace).await
    }

    /// Build the pool with a custom session connector.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::build`].
    #[instrument(skip_all, level = "info", err, fields(instances = instances.len()))]
    pub async fn build_with<C: Connect>(
        connector: &C,
        instances: &[InstanceConfig],
        transport: &Transport,
        trace: bool,
    ) -> Result<Self, SessionError> {
        info!("creating sessions");
        check_trace_allowed(trace)?;

        let mut building: Vec<(Arc<Session>, Vec<Instance>)> = Vec::new();
        let mut index: HashMap<SessionKey, usize> = HashMap::new();

        for config in instances {
            let key = SessionKey::for_instance(config);

            // re-use the session for the same region and key (explicit or empty)
            if let Some(&i) = index.get(&key) {
                if let Some((_, served)) = building.get_mut(i) {
                    served.push(Instance::from(config));
                }
                continue;
            }

            let mut session = connector.connect(&key, config, transport).await?;
            session.traced = trace;

            index.insert(key, building.len());
            building.push((Arc::new(session), vec![Instance::from(config)]));
        }

        for (session, served) in &mut building {
            resolve_resource_ids(session, served).await;
        }

        let entries = building
            .into_iter()
            .filter_map(|(session, served)| {
                let resolved: Vec<Arc<Instance>> = served
                    .into_iter()
                    .filter_map(|instance| {
                        if instance.is_resolved() {
                            Some(Arc::new(instance))
                        } else {
                            error!(
                                region = %instance.region,
                                instance = %instance.name,
                                "skipping instance: can't determine resource ID"
                            );
                            None
                        }
                    })
                    .collect();

                (!resolved.is_empty()).then_some(PoolEntry {
                    session,
                    instances: resolved,
                })
            })
            .collect();

        let pool = Self { entries };

        eprint!("{}", pool.summary());
        info!(sessions = pool.entries.len(), instances = pool.len(), "using sessions");

        Ok(pool)
    }

    /// Sessions in creation order with the instances they serve.
    pub fn sessions(&self) -> impl Iterator<Item = (&Arc<Session>, &[Arc<Instance>])> {
        self.entries
            .iter()
            .map(|e| (&e.session, e.instances.as_slice()))
    }

    pub fn instances(&self) -> impl Iterator<Item = &Arc<Instance>> {
        self.entries.iter().flat_map(|e| e.instances.iter())
    }

    /// Session and full instance information for a region and instance name.
    pub fn get(&self, region: &str, instance: &str) -> Option<(&Arc<Session>, &Arc<Instance>)> {
        self.entries.iter().find_map(|e| {
            e.instances
                .iter()
                .find(|i| i.region == region && i.name == instance)
                .map(|i| (&e.session, i))
        })
    }

    pub fn session_count(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.instances.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aligned table of region, instance, resource ID and enhanced interval.
    pub fn summary(&self) -> String {
        let header = ["Region", "Instance", "Resource ID", "Interval"];
        let rows: Vec<[String; 4]> = self
            .instances()
            .map(|i| {
                [
                    i.region.clone(),
                    i.name.clone(),
                    i.resource_id.clone(),
                    format!("{:?}", i.enhanced_monitoring_interval),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        let mut out = String::new();
        let mut push_row = |cells: [&str; 4]| {
            let line: Vec<String> = cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        };

        push_row(header);
        for [region, name, resource_id, interval] in &rows {
            push_row([region, name, resource_id, interval].map(String::as_str));
        }

        out
    }
}
