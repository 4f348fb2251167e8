//! Managed identity token endpoint client
//!
//! Uses the App Service identity endpoint when `IDENTITY_ENDPOINT` and
//! `IDENTITY_HEADER` are both set, the VM instance metadata service otherwise.
//! A client id selects a user-assigned identity. Tokens are cached per
//! resource until five minutes before they expire.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{AccessToken, CredentialError, TokenCredential, TokenRequestContext};
use crate::scope::DEFAULT_SUFFIX;
use crate::{Error, Result};

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const APP_SERVICE_SECRET_HEADER: &str = "X-IDENTITY-HEADER";
const IDENTITY_ENDPOINT_ENV: &str = "IDENTITY_ENDPOINT";
const IDENTITY_HEADER_ENV: &str = "IDENTITY_HEADER";
const REFRESH_MARGIN_SECS: i64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Token endpoint of the hosting environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEndpoint {
    /// Azure VM / scale set instance metadata service
    Imds(Url),
    /// App Service / Functions identity endpoint
    AppService {
        /// Value of `IDENTITY_ENDPOINT`
        url: Url,
        /// Value of `IDENTITY_HEADER`, sent as `X-IDENTITY-HEADER`
        secret: String,
    },
}

impl IdentityEndpoint {
    /// Pick the endpoint from environment variables read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `IDENTITY_ENDPOINT` is not a valid URL.
    pub fn detect(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup(IDENTITY_ENDPOINT_ENV).filter(|v| !v.is_empty());
        let secret = lookup(IDENTITY_HEADER_ENV).filter(|v| !v.is_empty());

        match (endpoint, secret) {
            (Some(endpoint), Some(secret)) => {
                let url = Url::parse(&endpoint).map_err(|e| {
                    Error::Config(format!("Invalid {IDENTITY_ENDPOINT_ENV} '{endpoint}': {e}"))
                })?;
                Ok(Self::AppService { url, secret })
            }
            _ => Url::parse(IMDS_ENDPOINT)
                .map(Self::Imds)
                .map_err(|e| Error::Internal(format!("Invalid IMDS endpoint: {e}"))),
        }
    }

    fn url(&self) -> &Url {
        match self {
            Self::Imds(url) | Self::AppService { url, .. } => url,
        }
    }

    fn api_version(&self) -> &'static str {
        match self {
            Self::Imds(_) => IMDS_API_VERSION,
            Self::AppService { .. } => APP_SERVICE_API_VERSION,
        }
    }
}

#[derive(Deserialize)]
struct MsiTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

/// Managed identity credential (system- or user-assigned)
pub struct ManagedIdentityCredential {
    http: Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
    cache: DashMap<String, AccessToken>,
}

impl ManagedIdentityCredential {
    /// Create for an explicit endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: IdentityEndpoint, client_id: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            client_id,
            cache: DashMap::new(),
        })
    }

    /// Create for the endpoint advertised by the process environment
    pub fn from_env(client_id: Option<&str>) -> Result<Self> {
        let endpoint = IdentityEndpoint::detect(|name| std::env::var(name).ok())?;
        Self::new(endpoint, client_id.map(str::to_string))
    }

    /// Client id of the selected user-assigned identity
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Endpoint tokens are requested from
    #[must_use]
    pub fn endpoint(&self) -> &IdentityEndpoint {
        &self.endpoint
    }

    fn cached(&self, resource: &str) -> Option<AccessToken> {
        let entry = self.cache.get(resource)?;
        let expires_on = entry.expires_on?;
        (expires_on - TimeDelta::seconds(REFRESH_MARGIN_SECS) > Utc::now()).then(|| entry.value().clone())
    }

    async fn fetch(&self, resource: &str) -> std::result::Result<AccessToken, CredentialError> {
        let mut url = self.endpoint.url().clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", self.endpoint.api_version());
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }

        let request = match &self.endpoint {
            IdentityEndpoint::Imds(_) => self.http.get(url).header("Metadata", "true"),
            IdentityEndpoint::AppService { secret, .. } => {
                self.http.get(url).header(APP_SERVICE_SECRET_HEADER, secret)
            }
        };

        let response = request.send().await.map_err(|e| {
            CredentialError::Unavailable(format!("managed identity endpoint unreachable: {e}"))
        })?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(CredentialError::Provider(
                "the requested identity has not been assigned to this resource".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(CredentialError::Provider(format!(
                "managed identity endpoint returned {status}"
            )));
        }

        let body: MsiTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Provider(format!("invalid token response: {e}")))?;

        Ok(AccessToken {
            token: body.access_token,
            expires_on: body.expires_on.as_ref().and_then(parse_expires_on),
        })
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(
        &self,
        request: &TokenRequestContext,
    ) -> std::result::Result<AccessToken, CredentialError> {
        let resource = scope_to_resource(&request.scopes)?;

        if let Some(token) = self.cached(resource) {
            debug!(resource = %resource, "Using cached managed identity token");
            return Ok(token);
        }

        debug!(resource = %resource, client_id = ?self.client_id, "Requesting managed identity token");
        let token = self.fetch(resource).await?;
        self.cache.insert(resource.to_string(), token.clone());
        Ok(token)
    }

    fn kind(&self) -> &'static str {
        if self.client_id.is_some() {
            "user-assigned"
        } else {
            "system-assigned"
        }
    }
}

/// The token endpoints take a v1 resource, not a v2 scope
fn scope_to_resource(scopes: &[String]) -> std::result::Result<&str, CredentialError> {
    let [scope] = scopes else {
        return Err(CredentialError::Provider(format!(
            "managed identity accepts exactly one scope, got {}",
            scopes.len()
        )));
    };

    let split = scope.len().saturating_sub(DEFAULT_SUFFIX.len());
    match (scope.get(..split), scope.get(split..)) {
        (Some(resource), Some(suffix)) if suffix.eq_ignore_ascii_case(DEFAULT_SUFFIX) => Ok(resource),
        _ => Ok(scope.as_str()),
    }
}

/// `expires_on` is unix seconds, as a string on IMDS and a number elsewhere
fn parse_expires_on(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        serde_json::Value::String(s) => s.parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}
