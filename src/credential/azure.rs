//! Azure default credential chain
//!
//! Thin adapter over `azure_identity`. The SDK owns the environment, App
//! Service, VM and Azure CLI sources and their token cache; this module only
//! maps its result into [`AccessToken`].

use std::sync::Arc;

use async_trait::async_trait;
use azure_core::auth::TokenCredential as AzureTokenCredential;
use azure_identity::{DefaultAzureCredential, TokenCredentialOptions};
use chrono::DateTime;
use tracing::debug;

use super::{AccessToken, CredentialError, TokenCredential, TokenRequestContext};
use crate::{Error, Result};

/// Credential backed by the Azure identity SDK
pub struct AzureCredential {
    inner: Arc<dyn AzureTokenCredential>,
}

impl AzureCredential {
    /// Default credential chain (environment, managed identity, Azure CLI)
    pub fn default_chain() -> Result<Self> {
        let credential = DefaultAzureCredential::create(TokenCredentialOptions::default())
            .map_err(|e| Error::Config(format!("Failed to initialise Azure default credential: {e}")))?;
        Ok(Self {
            inner: Arc::new(credential),
        })
    }
}

#[async_trait]
impl TokenCredential for AzureCredential {
    async fn get_token(
        &self,
        request: &TokenRequestContext,
    ) -> std::result::Result<AccessToken, CredentialError> {
        let scopes: Vec<&str> = request.scopes.iter().map(String::as_str).collect();
        debug!(scopes = ?scopes, "Requesting token from Azure default credential");

        let token = self
            .inner
            .get_token(&scopes)
            .await
            .map_err(|e| CredentialError::Provider(e.to_string()))?;

        Ok(AccessToken {
            token: token.token.secret().to_owned(),
            expires_on: DateTime::from_timestamp(token.expires_on.unix_timestamp(), 0),
        })
    }

    fn kind(&self) -> &'static str {
        "default"
    }
}
