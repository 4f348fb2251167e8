//! Inbound bearer token validation for the downstream service
//!
//! Validation is only active when an authority is configured. Tokens are
//! verified with `jsonwebtoken` against keys published by the authority:
//!
//! 1. Decode the JWT header (no verification) to read `kid` and `alg`.
//! 2. Resolve the authority's OIDC metadata (issuer, `jwks_uri`), cached.
//! 3. Resolve the signing key by `kid` (cached; refresh on miss, throttled).
//! 4. Verify signature and `exp`/`nbf` with 60s leeway.
//! 5. Check `aud` against the configured audiences and `iss` against the
//!    discovered issuer.

mod jwks;
mod middleware;

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AzureAdConfig;

pub use jwks::{JwksCache, OpenIdConfiguration};
pub use middleware::{bearer_token, require_bearer};

/// Placeholder in multi-tenant issuer templates
const TENANT_PLACEHOLDER: &str = "{tenantid}";

/// Bearer validation failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// JWT decode / signature / claim verification failed
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` is not in the authority's key set
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// OIDC metadata could not be discovered
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// Network error while fetching metadata or keys
    #[error("Metadata fetch error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token `aud` matches none of the configured audiences
    #[error("Token audience not accepted")]
    InvalidAudience,

    /// Token `iss` does not match the authority's issuer
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Expected issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },
}

/// Identity extracted from a validated bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedCaller {
    /// `sub` claim
    pub subject: String,
    /// `iss` claim
    pub issuer: String,
    /// Calling application (`azp` for v2 tokens, `appid` for v1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_app_id: Option<String>,
    /// Tenant id (`tid`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Delegated scopes (`scp`, space separated in the token)
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Application roles (`roles`)
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    iss: String,
    sub: String,
    #[serde(default)]
    aud: serde_json::Value,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    appid: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    scp: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Validates bearer tokens issued by one authority
pub struct BearerValidator {
    authority: String,
    audiences: Vec<String>,
    public_paths: Vec<String>,
    cache: Arc<JwksCache>,
}

impl BearerValidator {
    /// Build a validator, or `None` when no authority is configured
    #[must_use]
    pub fn from_config(config: &AzureAdConfig) -> Option<Self> {
        let authority = config.authority()?;
        let audiences = config.audiences();
        if audiences.is_empty() {
            warn!(authority = %authority, "No audience configured, token audience will not be checked");
        }

        Some(Self {
            authority: authority.to_string(),
            audiences,
            public_paths: config.public_paths.clone(),
            cache: Arc::new(JwksCache::new()),
        })
    }

    /// Authority tokens must come from
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Metadata and key cache backing this validator
    #[must_use]
    pub fn cache(&self) -> &JwksCache {
        &self.cache
    }

    /// Check if a path is public (bypasses validation).
    ///
    /// A public path matches itself and anything below it (`/health/live`),
    /// never a sibling sharing its prefix (`/healthz`).
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|public| {
            let base = public.trim_end_matches('/');
            path == public
                || path
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Validate a raw bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the token is malformed, signed with an unknown
    /// key, expired, or issued for another audience or issuer.
    pub async fn validate(&self, token: &str) -> Result<AuthenticatedCaller, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(AuthError::MissingKeyId)?;

        let metadata = self.cache.metadata(&self.authority).await?;
        let key = self.cache.decoding_key(&metadata.jwks_uri, &kid).await?;

        let validation = build_validation(&header);
        let token_data: TokenData<AccessTokenClaims> =
            jsonwebtoken::decode(token, &key, &validation)?;
        let claims = token_data.claims;

        if !self.audiences.is_empty() {
            check_audience(&claims.aud, &self.audiences)?;
        }
        check_issuer(&claims.iss, &metadata.issuer, claims.tid.as_deref())?;

        Ok(AuthenticatedCaller {
            subject: claims.sub,
            issuer: claims.iss,
            client_app_id: claims.azp.or(claims.appid),
            tenant_id: claims.tid,
            scopes: claims
                .scp
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            roles: claims.roles,
        })
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60;
    v.validate_nbf = true;
    // aud and iss are checked after decoding
    v.validate_aud = false;
    v
}

/// Validate that the token's `aud` claim contains one of the expected audiences.
fn check_audience(aud_claim: &serde_json::Value, expected: &[String]) -> Result<(), AuthError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => expected.iter().any(|e| e == s),
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| expected.iter().any(|e| e == s))),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(AuthError::InvalidAudience)
    }
}

/// Validate `iss`, substituting the token's tenant into multi-tenant issuer templates.
fn check_issuer(actual: &str, issuer: &str, tenant_id: Option<&str>) -> Result<(), AuthError> {
    let expected = match tenant_id {
        Some(tid) if issuer.contains(TENANT_PLACEHOLDER) => issuer.replace(TENANT_PLACEHOLDER, tid),
        _ => issuer.to_string(),
    };

    if actual == expected {
        Ok(())
    } else {
        Err(AuthError::IssuerMismatch {
            expected,
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(audience: Option<&str>) -> BearerValidator {
        BearerValidator::from_config(&AzureAdConfig {
            authority: Some("https://login.example.test/tenant/v2.0".to_string()),
            audience: audience.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn no_authority_means_no_validator() {
        assert!(BearerValidator::from_config(&AzureAdConfig::default()).is_none());
    }

    #[test]
    fn health_is_public_by_default() {
        let v = validator(Some("api://downstream"));
        assert!(v.is_public_path("/health"));
        assert!(!v.is_public_path("/weatherforecast"));
    }

    #[test]
    fn public_path_does_not_cover_siblings() {
        let v = validator(Some("api://downstream"));
        assert!(v.is_public_path("/health/"));
        assert!(v.is_public_path("/health/live"));
        assert!(!v.is_public_path("/healthz"));
        assert!(!v.is_public_path("/health-admin"));
    }

    #[test]
    fn check_audience_accepts_string_match() {
        let aud = serde_json::json!("api://downstream");
        assert!(check_audience(&aud, &["api://downstream".to_string()]).is_ok());
    }

    #[test]
    fn check_audience_accepts_client_id_in_array() {
        let aud = serde_json::json!(["other", "client-id"]);
        let expected = vec!["api://downstream".to_string(), "client-id".to_string()];
        assert!(check_audience(&aud, &expected).is_ok());
    }

    #[test]
    fn check_audience_rejects_missing_claim() {
        let aud = serde_json::Value::Null;
        assert!(matches!(
            check_audience(&aud, &["api://downstream".to_string()]),
            Err(AuthError::InvalidAudience)
        ));
    }

    #[test]
    fn check_issuer_exact_match() {
        let iss = "https://login.microsoftonline.com/t1/v2.0";
        assert!(check_issuer(iss, iss, Some("t1")).is_ok());
        assert!(check_issuer(iss, "https://login.microsoftonline.com/t2/v2.0", Some("t1")).is_err());
    }

    #[test]
    fn check_issuer_fills_tenant_template() {
        let template = "https://login.microsoftonline.com/{tenantid}/v2.0";
        assert!(check_issuer("https://login.microsoftonline.com/t1/v2.0", template, Some("t1")).is_ok());
        assert!(check_issuer("https://login.microsoftonline.com/t2/v2.0", template, Some("t1")).is_err());
        assert!(check_issuer("https://login.microsoftonline.com/t1/v2.0", template, None).is_err());
    }

    #[test]
    fn unsupported_algorithm_falls_back_to_rs256() {
        let header = Header::new(Algorithm::HS256);
        let validation = build_validation(&header);
        assert_eq!(validation.algorithms, vec![Algorithm::RS256]);
        assert!(!validation.validate_aud);
        assert_eq!(validation.leeway, 60);
    }

    #[tokio::test]
    async fn malformed_token_fails_before_discovery() {
        let result = validator(None).validate("not-a-jwt").await;
        assert!(matches!(result, Err(AuthError::Jwt(_))));
    }
}
