//! token-relay
//!
//! Two small HTTP services demonstrating delegated Entra ID token flow:
//!
//! - **caller**: acquires an access token from a managed identity (or the
//!   default Azure credential chain) and forwards it as a bearer token to the
//!   downstream service, relaying the raw response.
//! - **downstream**: validates inbound bearer tokens against an authority and
//!   audience, or serves anonymously when no authority is configured.
//!
//! The reusable core is [`scope::normalize`] plus [`token::TokenProvider`]:
//! resource identifiers become `/.default` scopes and every call asks the
//! injected [`credential::TokenCredential`] for a fresh token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod forecast;
pub mod proxy;
pub mod scope;
pub mod service;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
