//! Scope normalization
//!
//! Converts a configured scope or resource identifier into the single OAuth2
//! scope string requested from the identity provider. Plain scopes (`openid`,
//! `User.Read`) pass through; anything containing a `/` is treated as a
//! resource / App ID URI and gets the `/.default` suffix the v2 endpoint expects.

use std::fmt;

use crate::{Error, Result};

/// Suffix that turns a resource identifier into a v2 scope.
pub const DEFAULT_SUFFIX: &str = "/.default";

/// A scope string ready to be placed in a token request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedScope(String);

impl NormalizedScope {
    /// Borrow the scope string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned scope string
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedScope {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a scope or resource identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `input` is empty or whitespace.
pub fn normalize(input: &str) -> Result<NormalizedScope> {
    if input.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "scope/resource must be provided".to_string(),
        ));
    }

    if !input.contains('/') || has_default_suffix(input) {
        return Ok(NormalizedScope(input.to_string()));
    }

    Ok(NormalizedScope(format!("{input}{DEFAULT_SUFFIX}")))
}

fn has_default_suffix(input: &str) -> bool {
    input.len() >= DEFAULT_SUFFIX.len()
        && input
            .get(input.len() - DEFAULT_SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(DEFAULT_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_with_suffix_is_unchanged() {
        assert_eq!(normalize("api://x/.default").unwrap().as_str(), "api://x/.default");
    }

    #[test]
    fn resource_gets_default_suffix() {
        assert_eq!(normalize("api://x").unwrap().as_str(), "api://x/.default");
    }

    #[test]
    fn plain_scope_passes_through() {
        assert_eq!(normalize("openid").unwrap().as_str(), "openid");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(normalize(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn whitespace_input_is_rejected() {
        assert!(matches!(normalize("   \t"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn suffix_check_ignores_case() {
        assert_eq!(
            normalize("https://graph.microsoft.com/.DEFAULT").unwrap().as_str(),
            "https://graph.microsoft.com/.DEFAULT"
        );
        assert_eq!(
            normalize("api://x/.Default").unwrap().as_str(),
            "api://x/.Default"
        );
    }

    #[test]
    fn url_resources_get_suffix() {
        let inputs = [
            "https://management.azure.com",
            "https://management.azure.com/",
            "api://00000000-0000-0000-0000-000000000001",
            "https://contoso.onmicrosoft.com/downstream-api",
        ];

        for input in inputs {
            let scope = normalize(input).unwrap();
            assert_eq!(scope.as_str(), format!("{input}{DEFAULT_SUFFIX}"));
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "openid",
            "User.Read",
            "api://x",
            "api://x/.default",
            "https://contoso.onmicrosoft.com/api/.DEFAULT",
            "https://management.azure.com/",
        ];

        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn suffix_lookalikes_still_get_suffix() {
        // ".default" without the separator does not count
        assert_eq!(
            normalize("api://x.default").unwrap().as_str(),
            "api://x.default/.default"
        );
    }

    #[test]
    fn multibyte_input_does_not_panic() {
        assert_eq!(normalize("api://é").unwrap().as_str(), "api://é/.default");
    }
}
