//! OIDC metadata and JWKS caching
//!
//! - Metadata is discovered from `{authority}/.well-known/openid-configuration`
//!   and cached per authority.
//! - Signing keys are cached per `jwks_uri`. An unknown `kid` forces a
//!   refresh before the key is reported missing, at most once per
//!   [`MIN_REFRESH_INTERVAL`] per key set. Tokens with unknown `kid`s inside
//!   that window fail without touching the network.

use std::time::{Duration, Instant};

use dashmap::{DashMap, mapref::entry::Entry};
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::Deserialize;
use tracing::debug;

use super::AuthError;

/// Default TTL for metadata and key sets
pub const CACHE_TTL: Duration = Duration::from_secs(3600);
/// Minimum spacing between key set fetches triggered by an unknown `kid`
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Subset of the OpenID Provider metadata document
#[derive(Debug, Clone, Deserialize)]
pub struct OpenIdConfiguration {
    /// Issuer identifier tokens must carry in `iss`
    pub issuer: String,
    /// Location of the signing key set
    pub jwks_uri: String,
}

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Metadata and key cache shared by all validation requests
pub struct JwksCache {
    metadata: DashMap<String, Cached<OpenIdConfiguration>>,
    keys: DashMap<String, Cached<JwkSet>>,
    last_key_fetch: DashMap<String, Instant>,
    http: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
}

impl JwksCache {
    /// Create with default 1-hour TTL.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DashMap::new(),
            keys: DashMap::new(),
            last_key_fetch: DashMap::new(),
            http: reqwest::Client::builder()
                .https_only(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            ttl: CACHE_TTL,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
        }
    }

    /// Replace the HTTP client used for discovery and key fetches
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Override the spacing between `kid`-triggered refreshes
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Prime the cache with known metadata for `authority`
    pub fn insert_metadata(&self, authority: &str, metadata: OpenIdConfiguration) {
        self.metadata
            .insert(authority.to_string(), Cached::new(metadata));
    }

    /// Prime the cache with a known key set for `jwks_uri`.
    ///
    /// Counts as a fetch for refresh throttling.
    pub fn insert_keys(&self, jwks_uri: &str, keys: JwkSet) {
        self.last_key_fetch.insert(jwks_uri.to_string(), Instant::now());
        self.keys.insert(jwks_uri.to_string(), Cached::new(keys));
    }

    /// OIDC metadata for `authority`, discovered on first use
    pub async fn metadata(&self, authority: &str) -> Result<OpenIdConfiguration, AuthError> {
        if let Some(cached) = self.metadata.get(authority) {
            if !cached.is_stale(self.ttl) {
                return Ok(cached.value.clone());
            }
        }

        let url = discovery_url(authority);
        debug!(authority = %authority, "Fetching OpenID configuration from {url}");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Discovery(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let metadata: OpenIdConfiguration = response.json().await?;

        self.insert_metadata(authority, metadata.clone());
        Ok(metadata)
    }

    /// Decoding key for `kid`, refreshing the key set if it is unknown and
    /// no refresh happened within the minimum interval
    pub async fn decoding_key(&self, jwks_uri: &str, kid: &str) -> Result<DecodingKey, AuthError> {
        let jwks = match self.cached_keys(jwks_uri) {
            Some(jwks) => jwks,
            None => {
                self.last_key_fetch.insert(jwks_uri.to_string(), Instant::now());
                self.fetch_keys(jwks_uri).await?
            }
        };
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        if !self.claim_refresh(jwks_uri) {
            debug!(kid = %kid, "Key not found, key set refreshed recently");
            return Err(AuthError::UnknownKeyId(kid.to_string()));
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.fetch_keys(jwks_uri).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| AuthError::UnknownKeyId(kid.to_string()))
    }

    fn cached_keys(&self, jwks_uri: &str) -> Option<JwkSet> {
        self.keys
            .get(jwks_uri)
            .filter(|cached| !cached.is_stale(self.ttl))
            .map(|cached| cached.value.clone())
    }

    /// Record a fetch for `jwks_uri` unless one happened within the interval
    fn claim_refresh(&self, jwks_uri: &str) -> bool {
        match self.last_key_fetch.entry(jwks_uri.to_string()) {
            Entry::Occupied(mut last) => {
                if last.get().elapsed() < self.min_refresh_interval {
                    return false;
                }
                last.insert(Instant::now());
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        }
    }

    async fn fetch_keys(&self, jwks_uri: &str) -> Result<JwkSet, AuthError> {
        debug!("Fetching JWKS from {jwks_uri}");
        let jwks: JwkSet = self.http.get(jwks_uri).send().await?.json().await?;
        self.keys.insert(jwks_uri.to_string(), Cached::new(jwks.clone()));
        Ok(jwks)
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known discovery document location for an authority
fn discovery_url(authority: &str) -> String {
    let base = authority.trim_end_matches('/');
    format!("{base}/.well-known/openid-configuration")
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
