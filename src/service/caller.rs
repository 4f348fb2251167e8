//! Caller service
//!
//! Serves its own forecast and relays the downstream forecast using a token
//! acquired from the configured credential.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::credential::TokenCredential;
use crate::forecast::{self, WeatherForecast};
use crate::proxy::DownstreamClient;
use crate::token::TokenProvider;
use crate::Result;

/// Downstream path relayed by `/proxyweather`
pub const DOWNSTREAM_FORECAST_PATH: &str = "weatherforecast";

/// Shared state for caller handlers
pub struct CallerState {
    /// Client for the downstream API
    pub downstream: DownstreamClient,
    /// Scope requested for downstream calls
    pub scope: String,
}

impl CallerState {
    /// Build from configuration and an injected credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if no downstream scope
    /// can be resolved or the base URL is invalid.
    pub fn from_config(config: &Config, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let scope = config.downstream.resolve_scope()?;
        let downstream = DownstreamClient::new(&config.downstream, TokenProvider::new(credential))?;

        info!(base_url = %downstream.base_url(), scope = %scope, "Downstream configured");
        Ok(Self { downstream, scope })
    }
}

/// Create the caller router
pub fn create_router(state: Arc<CallerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/weatherforecast", get(weather_handler))
        .route("/proxyweather", get(proxy_weather_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "caller" }))
}

async fn weather_handler() -> Json<Vec<WeatherForecast>> {
    Json(forecast::generate())
}

/// GET /proxyweather - relay the downstream forecast with a bearer token
async fn proxy_weather_handler(State(state): State<Arc<CallerState>>) -> Response {
    match state
        .downstream
        .proxy(DOWNSTREAM_FORECAST_PATH, &state.scope)
        .await
    {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Proxy call failed");
            e.into_response()
        }
    }
}
