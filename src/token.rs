//! Token acquisition
//!
//! Every call normalizes the requested scope and asks the credential for a
//! fresh token. Nothing is cached here; the credential may cache internally.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;
use crate::credential::{TokenCredential, TokenRequestContext};
use crate::scope;

/// Acquires access tokens for downstream calls
#[derive(Clone)]
pub struct TokenProvider {
    credential: Arc<dyn TokenCredential>,
}

impl TokenProvider {
    /// Create a provider over an injected credential
    #[must_use]
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self { credential }
    }

    /// Get an access token for a scope or resource identifier.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`](crate::Error::InvalidArgument) for empty input
    /// - [`Error::CredentialFailure`](crate::Error::CredentialFailure) if the
    ///   credential cannot issue a token
    pub async fn get_access_token(&self, scope_or_resource: &str) -> Result<String> {
        let scope = scope::normalize(scope_or_resource)?;
        let request = TokenRequestContext::single(scope.into_inner());

        match self.credential.get_token(&request).await {
            Ok(token) => {
                debug!(credential = self.credential.kind(), scopes = ?request.scopes, expires_on = ?token.expires_on, "Acquired access token");
                Ok(token.token)
            }
            Err(e) => {
                warn!(credential = self.credential.kind(), scopes = ?request.scopes, error = %e, "Token acquisition failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::credential::{AccessToken, CredentialError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every request and hands out a fixed token
    struct RecordingCredential {
        token: String,
        requests: Mutex<Vec<TokenRequestContext>>,
    }

    impl RecordingCredential {
        fn new(token: &str) -> Arc<Self> {
            Arc::new(Self {
                token: token.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TokenCredential for RecordingCredential {
        async fn get_token(
            &self,
            request: &TokenRequestContext,
        ) -> std::result::Result<AccessToken, CredentialError> {
            self.requests.lock().push(request.clone());
            Ok(AccessToken {
                token: self.token.clone(),
                expires_on: None,
            })
        }
    }

    struct FailingCredential;

    #[async_trait]
    impl TokenCredential for FailingCredential {
        async fn get_token(
            &self,
            _request: &TokenRequestContext,
        ) -> std::result::Result<AccessToken, CredentialError> {
            Err(CredentialError::Unavailable("no managed identity endpoint".to_string()))
        }
    }

    #[tokio::test]
    async fn resource_is_normalized_before_request() {
        let credential = RecordingCredential::new("T1");
        let provider = TokenProvider::new(credential.clone());

        let token = provider.get_access_token("api://downstream").await.unwrap();

        assert_eq!(token, "T1");
        let requests = credential.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].scopes, vec!["api://downstream/.default".to_string()]);
    }

    #[tokio::test]
    async fn each_call_requests_a_fresh_token() {
        let credential = RecordingCredential::new("T1");
        let provider = TokenProvider::new(credential.clone());

        provider.get_access_token("openid").await.unwrap();
        provider.get_access_token("openid").await.unwrap();

        assert_eq!(credential.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_scope_never_reaches_credential() {
        let credential = RecordingCredential::new("T1");
        let provider = TokenProvider::new(credential.clone());

        let result = provider.get_access_token("").await;

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(credential.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn credential_failure_propagates() {
        let provider = TokenProvider::new(Arc::new(FailingCredential));

        let result = provider.get_access_token("api://downstream").await;

        match result {
            Err(Error::CredentialFailure(CredentialError::Unavailable(msg))) => {
                assert!(msg.contains("managed identity"));
            }
            other => panic!("expected credential failure, got {other:?}"),
        }
    }
}
