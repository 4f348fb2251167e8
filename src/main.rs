//! token-relay - caller/downstream services for delegated Entra ID tokens

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use token_relay::{
    auth::BearerValidator,
    cli::{Cli, Command},
    config::{Config, DEFAULT_CALLER_PORT, DEFAULT_DOWNSTREAM_PORT},
    credential, scope,
    service::{self, caller, downstream},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Scope { ref input } => run_scope(input),
        Command::Caller => run_caller(&cli).await,
        Command::Downstream => run_downstream(&cli).await,
    }
}

/// Print the normalized form of a scope or resource identifier
fn run_scope(input: &str) -> ExitCode {
    match scope::normalize(input) {
        Ok(scope) => {
            println!("{scope}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = Some(port);
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Run the caller service
async fn run_caller(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let credential = match credential::from_config(&config.credential, &config.managed_identity) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create credential: {e}");
            return ExitCode::FAILURE;
        }
    };

    let state = match caller::CallerState::from_config(&config, credential) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to configure caller: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting caller service");

    let port = config.server.port_or(DEFAULT_CALLER_PORT);
    if let Err(e) = service::serve(caller::create_router(state), "caller", &config.server.host, port).await {
        error!("Caller error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Run the downstream service
async fn run_downstream(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let validator = BearerValidator::from_config(&config.azure_ad).map(Arc::new);
    match validator {
        Some(ref v) => info!(authority = %v.authority(), audiences = ?config.azure_ad.audiences(), "Bearer validation enabled"),
        None => warn!("No authority configured - downstream is open to anonymous requests"),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting downstream service");

    let port = config.server.port_or(DEFAULT_DOWNSTREAM_PORT);
    if let Err(e) = service::serve(downstream::create_router(validator), "downstream", &config.server.host, port).await {
        error!("Downstream error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
