//! Configuration management
//!
//! Layering: optional YAML file, then `TOKEN_RELAY_`-prefixed environment
//! variables (`__` separates sections, e.g. `TOKEN_RELAY_DOWNSTREAM__BASE_URL`).
//! Section and key names also accept the PascalCase spelling used by
//! `appsettings`-style files (`Downstream: { BaseUrl: ... }`).

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::scope;
use crate::{Error, Result};

/// Default caller service port
pub const DEFAULT_CALLER_PORT: u16 = 5001;
/// Default downstream service port
pub const DEFAULT_DOWNSTREAM_PORT: u16 = 5002;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Listener configuration
    #[serde(alias = "Server")]
    pub server: ServerConfig,
    /// Downstream API the caller forwards to
    #[serde(alias = "Downstream")]
    pub downstream: DownstreamConfig,
    /// Managed identity selection
    #[serde(alias = "ManagedIdentity")]
    pub managed_identity: ManagedIdentityConfig,
    /// Inbound bearer validation (downstream service)
    #[serde(alias = "AzureAd")]
    pub azure_ad: AzureAdConfig,
    /// Credential source for outbound tokens
    #[serde(alias = "Credential")]
    pub credential: CredentialConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("TOKEN_RELAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in string values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.downstream.base_url = Self::expand_string(&re, &self.downstream.base_url);

        let optional = [
            &mut self.downstream.scope,
            &mut self.downstream.resource_id,
            &mut self.managed_identity.client_id,
            &mut self.azure_ad.authority,
            &mut self.azure_ad.audience,
            &mut self.azure_ad.client_id,
        ];
        for value in optional.into_iter().flatten() {
            *value = Self::expand_string(&re, value);
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(alias = "Host")]
    pub host: String,
    /// Port to listen on (service-specific default when unset)
    #[serde(alias = "Port")]
    pub port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }
}

impl ServerConfig {
    /// Configured port, or `default` for the service being run
    #[must_use]
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// Downstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base address of the downstream API
    #[serde(alias = "BaseUrl")]
    pub base_url: String,
    /// OAuth2 scope to request (preferred)
    #[serde(alias = "Scope")]
    pub scope: Option<String>,
    /// Resource / App ID URI, used when `scope` is unset
    #[serde(alias = "ResourceId")]
    pub resource_id: Option<String>,
    /// Outbound request timeout
    #[serde(with = "humantime_serde", alias = "Timeout")]
    pub timeout: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:5002/".to_string(),
            scope: None,
            resource_id: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DownstreamConfig {
    /// Scope to request for downstream calls.
    ///
    /// `scope` wins; otherwise `resource_id` is normalized to a `/.default`
    /// scope. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither value is set.
    pub fn resolve_scope(&self) -> Result<String> {
        if let Some(scope) = non_blank(self.scope.as_deref()) {
            return Ok(scope.to_string());
        }
        if let Some(resource) = non_blank(self.resource_id.as_deref()) {
            return Ok(scope::normalize(resource)?.into_inner());
        }
        Err(Error::Config(
            "downstream.scope or downstream.resource_id must be set".to_string(),
        ))
    }

    /// Parsed base URL, with a trailing `/` so relative paths append to it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not an absolute URL.
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid downstream.base_url '{}': {e}", self.base_url)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// Managed identity selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedIdentityConfig {
    /// Client id of a user-assigned identity (system-assigned when unset)
    #[serde(alias = "ClientId")]
    pub client_id: Option<String>,
}

impl ManagedIdentityConfig {
    /// Non-blank client id, if configured
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        non_blank(self.client_id.as_deref())
    }
}

/// Inbound JWT validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureAdConfig {
    /// OIDC authority, e.g. `https://login.microsoftonline.com/<tenant>/v2.0`.
    /// When unset the downstream service runs anonymously.
    #[serde(alias = "Authority")]
    pub authority: Option<String>,
    /// Expected audience (App ID URI)
    #[serde(alias = "Audience")]
    pub audience: Option<String>,
    /// Application (client) id, also accepted as audience
    #[serde(alias = "ClientId")]
    pub client_id: Option<String>,
    /// Paths that bypass validation
    #[serde(alias = "PublicPaths")]
    pub public_paths: Vec<String>,
}

impl Default for AzureAdConfig {
    fn default() -> Self {
        Self {
            authority: None,
            audience: None,
            client_id: None,
            public_paths: vec!["/health".to_string()],
        }
    }
}

impl AzureAdConfig {
    /// Non-blank authority, if configured
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        non_blank(self.authority.as_deref())
    }

    /// Accepted audiences: `audience` and `client_id`, blanks dropped
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        [self.audience.as_deref(), self.client_id.as_deref()]
            .into_iter()
            .filter_map(non_blank)
            .map(str::to_string)
            .collect()
    }
}

/// Where outbound tokens come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Azure managed identity / default credential chain
    #[default]
    ManagedIdentity,
    /// Fixed token from configuration
    Static,
}

/// Outbound credential configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Credential source
    #[serde(alias = "Source")]
    pub source: CredentialSource,
    /// Token for the `static` source. Supports `env:VAR_NAME`.
    #[serde(alias = "Token")]
    pub token: Option<String>,
}

impl CredentialConfig {
    /// Resolve the static token (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            if let Some(var_name) = token.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| token.clone())
            } else {
                token.clone()
            }
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Durations as `"250ms"`, `"30s"`, `"5m"` or `"1h"` (bare numbers are seconds)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Whole seconds as `"{n}s"`, anything finer as `"{n}ms"`
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Parse a duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for an unknown unit or a non-numeric value.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| de::Error::custom(format!("invalid duration '{raw}'")))
    }

    fn parse(value: &str) -> Option<Duration> {
        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (number, unit) = value.split_at(split);
        let n: u64 = number.parse().ok()?;

        match unit.trim() {
            "ms" => Some(Duration::from_millis(n)),
            "" | "s" => Some(Duration::from_secs(n)),
            "m" => n.checked_mul(60).map(Duration::from_secs),
            "h" => n.checked_mul(3600).map(Duration::from_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_ports() {
        let config = Config::default();
        assert_eq!(config.downstream.base_url, "https://localhost:5002/");
        assert_eq!(config.server.port_or(DEFAULT_CALLER_PORT), 5001);
        assert_eq!(config.azure_ad.public_paths, vec!["/health".to_string()]);
        assert_eq!(config.credential.source, CredentialSource::ManagedIdentity);
        assert!(config.azure_ad.authority().is_none());
    }

    #[test]
    fn scope_is_preferred_over_resource_id() {
        let downstream = DownstreamConfig {
            scope: Some("api://downstream/Forecast.Read".to_string()),
            resource_id: Some("api://downstream".to_string()),
            ..Default::default()
        };
        assert_eq!(downstream.resolve_scope().unwrap(), "api://downstream/Forecast.Read");
    }

    #[test]
    fn resource_id_fallback_is_normalized() {
        let downstream = DownstreamConfig {
            resource_id: Some("api://downstream".to_string()),
            ..Default::default()
        };
        assert_eq!(downstream.resolve_scope().unwrap(), "api://downstream/.default");

        let already = DownstreamConfig {
            resource_id: Some("api://downstream/.default".to_string()),
            ..Default::default()
        };
        assert_eq!(already.resolve_scope().unwrap(), "api://downstream/.default");
    }

    #[test]
    fn blank_scope_falls_back_to_resource_id() {
        let downstream = DownstreamConfig {
            scope: Some("  ".to_string()),
            resource_id: Some("api://downstream".to_string()),
            ..Default::default()
        };
        assert_eq!(downstream.resolve_scope().unwrap(), "api://downstream/.default");
    }

    #[test]
    fn missing_scope_and_resource_is_config_error() {
        let downstream = DownstreamConfig {
            resource_id: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(downstream.resolve_scope(), Err(Error::Config(_))));
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let downstream = DownstreamConfig {
            base_url: "https://api.contoso.com/forecast".to_string(),
            ..Default::default()
        };
        assert_eq!(
            downstream.base_url().unwrap().as_str(),
            "https://api.contoso.com/forecast/"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let downstream = DownstreamConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(downstream.base_url(), Err(Error::Config(_))));
    }

    #[test]
    fn audiences_drop_blank_values() {
        let azure_ad = AzureAdConfig {
            authority: Some("https://login.microsoftonline.com/tenant/v2.0".to_string()),
            audience: Some("api://downstream".to_string()),
            client_id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(azure_ad.audiences(), vec!["api://downstream".to_string()]);

        let both = AzureAdConfig {
            audience: Some("api://downstream".to_string()),
            client_id: Some("11111111-2222-3333-4444-555555555555".to_string()),
            ..Default::default()
        };
        assert_eq!(both.audiences().len(), 2);
    }

    #[test]
    fn blank_authority_means_anonymous() {
        let azure_ad = AzureAdConfig {
            authority: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(azure_ad.authority().is_none());
    }

    #[test]
    fn pascal_case_keys_are_accepted() {
        let yaml = r#"
Downstream:
  BaseUrl: "https://downstream.example.com/"
  ResourceId: "api://downstream"
  Timeout: "5s"
ManagedIdentity:
  ClientId: "client-123"
AzureAd:
  Authority: "https://login.microsoftonline.com/tenant/v2.0"
  Audience: "api://downstream"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.downstream.base_url, "https://downstream.example.com/");
        assert_eq!(config.downstream.timeout, Duration::from_secs(5));
        assert_eq!(config.managed_identity.client_id(), Some("client-123"));
        assert_eq!(
            config.azure_ad.authority(),
            Some("https://login.microsoftonline.com/tenant/v2.0")
        );
    }

    #[test]
    fn snake_case_yaml_is_accepted() {
        let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
downstream:
  scope: "api://downstream/.default"
  timeout: "250ms"
credential:
  source: static
  token: "dev-token"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port_or(DEFAULT_CALLER_PORT), 8080);
        assert_eq!(config.downstream.timeout, Duration::from_millis(250));
        assert_eq!(config.credential.source, CredentialSource::Static);
        assert_eq!(config.credential.resolve_token().as_deref(), Some("dev-token"));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "downstream:\n  resource_id: \"api://from-file\"").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.downstream.resolve_scope().unwrap(), "api://from-file/.default");
    }

    #[test]
    fn timeout_units_parse() {
        for (raw, expected) in [
            ("250ms", Duration::from_millis(250)),
            ("45", Duration::from_secs(45)),
            ("5m", Duration::from_secs(300)),
            ("1h", Duration::from_secs(3600)),
        ] {
            let yaml = format!("timeout: \"{raw}\"");
            let downstream: DownstreamConfig = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(downstream.timeout, expected, "parsing {raw}");
        }
        assert!(serde_yaml::from_str::<DownstreamConfig>("timeout: \"5d\"").is_err());
    }

    #[test]
    fn sub_second_timeout_serializes_as_millis() {
        let downstream = DownstreamConfig {
            timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let value = serde_json::to_value(&downstream).unwrap();
        assert_eq!(value["timeout"], "250ms");

        let whole = DownstreamConfig::default();
        assert_eq!(serde_json::to_value(&whole).unwrap()["timeout"], "30s");
    }

    #[test]
    fn load_rejects_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/relay.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn expand_string_uses_default_for_unset_var() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let value = Config::expand_string(&re, "${TOKEN_RELAY_TEST_UNSET_VAR:-https://fallback/}");
        assert_eq!(value, "https://fallback/");
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
