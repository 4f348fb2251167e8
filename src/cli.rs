//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Caller/downstream services for delegated Entra ID tokens
#[derive(Parser, Debug)]
#[command(name = "token-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOKEN_RELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (default: 5001 caller, 5002 downstream)
    #[arg(short, long, env = "TOKEN_RELAY_PORT", global = true)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOKEN_RELAY_HOST", global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TOKEN_RELAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOKEN_RELAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Service to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the caller service (acquires tokens, proxies to downstream)
    Caller,

    /// Run the downstream service (validates bearer tokens)
    Downstream,

    /// Print the normalized scope for a scope or resource identifier
    Scope {
        /// Scope or resource identifier (e.g. `api://my-api`)
        input: String,
    },
}
