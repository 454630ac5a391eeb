use crate::{config::InstanceConfig, sessions::SessionError};
use aws_config::{BehaviorVersion, sts::AssumeRoleProvider};
use aws_sdk_rds::config::{Credentials, Region};
use secrecy::ExposeSecret;
use std::fmt;
use tracing::debug;

const PROVIDER_NAME: &str = "rds_exporter";
const ROLE_SESSION_NAME: &str = "rds_exporter";

/// Credentials used by every instance sharing a session.
pub enum CredentialHandle {
    /// Short-lived credentials from STS, refreshed by the provider.
    AssumeRole(AssumeRoleProvider),
    /// Long-lived keys from the catalog.
    Static(Credentials),
    /// Environment, profile, container or instance metadata.
    DefaultChain,
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssumeRole(_) => f.write_str("AssumeRole"),
            Self::Static(_) => f.write_str("Static"),
            Self::DefaultChain => f.write_str("DefaultChain"),
        }
    }
}

fn static_credentials(instance: &InstanceConfig) -> Credentials {
    let secret = instance
        .aws_secret_key
        .as_ref()
        .map(|s| s.expose_secret().to_string())
        .unwrap_or_default();

    Credentials::new(instance.access_key(), secret, None, None, PROVIDER_NAME)
}

/// Decide which credentials the session for `instance` uses.
///
/// A role ARN wins over static keys; static keys win over the default chain.
/// When a role is assumed, static keys (if any) sign the STS call.
///
/// # Errors
///
/// Returns [`SessionError::Credential`] if the base configuration for the
/// role assumption can't be built.
pub async fn resolve(instance: &InstanceConfig) -> Result<CredentialHandle, SessionError> {
    if let Some(role_arn) = instance.role_arn() {
        if instance.region.trim().is_empty() {
            return Err(SessionError::Credential {
                instance: instance.instance.clone(),
                reason: "role assumption requires a region".to_string(),
            });
        }

        let mut base = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(instance.region.clone()));
        if instance.has_static_keys() {
            base = base.credentials_provider(static_credentials(instance));
        }
        let base = base.load().await;

        debug!(
            region = %instance.region,
            instance = %instance.instance,
            role_arn,
            "assuming role"
        );

        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(ROLE_SESSION_NAME)
            .configure(&base)
            .build()
            .await;

        return Ok(CredentialHandle::AssumeRole(provider));
    }

    if instance.has_static_keys() {
        return Ok(CredentialHandle::Static(static_credentials(instance)));
    }

    Ok(CredentialHandle::DefaultChain)
}
