//! Error types for token-relay

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::credential::CredentialError;

/// Result type alias for token-relay
pub type Result<T> = std::result::Result<T, Error>;

/// token-relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied argument was rejected (e.g. empty scope/resource)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The credential could not issue a token
    #[error("Credential failure: {0}")]
    CredentialFailure(#[from] CredentialError),

    /// Downstream responded with a non-success status
    #[error("Upstream error: downstream returned {status}")]
    Upstream {
        /// Downstream HTTP status code
        status: u16,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error terminates a request
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CredentialFailure(_) | Self::Upstream { .. } | Self::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Upstream { status: upstream } => json!({
                "error": self.to_string(),
                "upstream_status": upstream,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
