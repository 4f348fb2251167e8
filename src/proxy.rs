//! Authenticated downstream calls
//!
//! One token, one GET, one attempt. The downstream body is relayed untouched.

use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DownstreamConfig;
use crate::token::TokenProvider;
use crate::{Error, Result};

/// HTTP client for the downstream API
#[derive(Clone)]
pub struct DownstreamClient {
    http: Client,
    base_url: Url,
    tokens: TokenProvider,
}

impl DownstreamClient {
    /// Create a client from downstream configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &DownstreamConfig, tokens: TokenProvider) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url()?,
            tokens,
        })
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a downstream path against the base URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the path cannot be joined.
    pub fn endpoint(&self, downstream_path: &str) -> Result<Url> {
        self.base_url
            .join(downstream_path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidArgument(format!("Invalid downstream path '{downstream_path}': {e}")))
    }

    /// GET `downstream_path` with a bearer token for `scope_or_resource`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty scope or unjoinable path
    /// - [`Error::CredentialFailure`] if no token could be acquired
    /// - [`Error::Http`] on transport failure or timeout
    /// - [`Error::Upstream`] if the downstream answers with a non-2xx status
    pub async fn proxy(&self, downstream_path: &str, scope_or_resource: &str) -> Result<Bytes> {
        let token = self.tokens.get_access_token(scope_or_resource).await?;
        let url = self.endpoint(downstream_path)?;

        debug!(url = %url, "Calling downstream");
        let response = self.http.get(url.clone()).bearer_auth(&token).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Downstream returned error status");
            return Err(Error::Upstream {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        info!(url = %url, status = status.as_u16(), bytes = body.len(), "Downstream call succeeded");
        Ok(body)
    }
}
