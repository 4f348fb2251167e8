//! Fixed token credential for local development

use async_trait::async_trait;
use tracing::debug;

use super::{AccessToken, CredentialError, TokenCredential, TokenRequestContext};

/// Returns the same pre-issued token for every scope.
///
/// Useful against a downstream running without an authority, or with a token
/// obtained out of band (e.g. `az account get-access-token`).
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    /// Create from a resolved token value
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(
        &self,
        request: &TokenRequestContext,
    ) -> Result<AccessToken, CredentialError> {
        if self.token.is_empty() {
            return Err(CredentialError::Unavailable(
                "static token is empty".to_string(),
            ));
        }
        debug!(scopes = ?request.scopes, "Issuing static token");
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: None,
        })
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_is_unavailable() {
        let credential = StaticTokenCredential::new("");
        let result = credential
            .get_token(&TokenRequestContext::single("openid"))
            .await;
        assert!(matches!(result, Err(CredentialError::Unavailable(_))));
    }
}
