//! Token credentials
//!
//! A credential is anything that can produce an access token for a set of
//! scopes. A configured client id selects a user-assigned managed identity;
//! otherwise the Azure default credential chain is used (system-assigned
//! managed identity without the `azure` feature). Local development can use a
//! static token.

#[cfg(feature = "azure")]
mod azure;
mod managed_identity;
mod static_token;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{CredentialConfig, CredentialSource, ManagedIdentityConfig};
use crate::{Error, Result};

#[cfg(feature = "azure")]
pub use azure::AzureCredential;
pub use managed_identity::{IdentityEndpoint, ManagedIdentityCredential};
pub use static_token::StaticTokenCredential;

/// Errors raised by a credential source
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No usable identity is configured in this environment
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    /// The identity provider refused or failed the request
    #[error("token request failed: {0}")]
    Provider(String),
}

/// Scopes requested in a single token acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequestContext {
    /// Requested scopes
    pub scopes: Vec<String>,
}

impl TokenRequestContext {
    /// Context for exactly one scope
    #[must_use]
    pub fn single(scope: impl Into<String>) -> Self {
        Self {
            scopes: vec![scope.into()],
        }
    }
}

/// Access token returned by a credential
#[derive(Clone)]
pub struct AccessToken {
    /// Opaque bearer token
    pub token: String,
    /// Expiry reported by the identity provider, if any
    pub expires_on: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Capability to produce an access token for a request context
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Acquire a token for `request`
    async fn get_token(
        &self,
        request: &TokenRequestContext,
    ) -> std::result::Result<AccessToken, CredentialError>;

    /// Short label for logs
    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// Build the credential selected by configuration
pub fn from_config(
    credential: &CredentialConfig,
    managed_identity: &ManagedIdentityConfig,
) -> Result<Arc<dyn TokenCredential>> {
    match credential.source {
        CredentialSource::Static => {
            let token = credential.resolve_token().ok_or_else(|| {
                Error::Config("credential.source is 'static' but credential.token is not set".to_string())
            })?;
            info!("Using static development token credential");
            Ok(Arc::new(StaticTokenCredential::new(token)))
        }
        CredentialSource::ManagedIdentity => managed_identity_credential(managed_identity),
    }
}

fn managed_identity_credential(config: &ManagedIdentityConfig) -> Result<Arc<dyn TokenCredential>> {
    let credential: Arc<dyn TokenCredential> = match config.client_id() {
        Some(client_id) => Arc::new(ManagedIdentityCredential::from_env(Some(client_id))?),
        None => default_credential()?,
    };
    info!(kind = credential.kind(), client_id = ?config.client_id(), "Using managed identity credential");
    Ok(credential)
}

#[cfg(feature = "azure")]
fn default_credential() -> Result<Arc<dyn TokenCredential>> {
    Ok(Arc::new(AzureCredential::default_chain()?))
}

#[cfg(not(feature = "azure"))]
fn default_credential() -> Result<Arc<dyn TokenCredential>> {
    Ok(Arc::new(ManagedIdentityCredential::from_env(None)?))
}
