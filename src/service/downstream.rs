//! Downstream service
//!
//! Serves the forecast; requires a valid bearer token when an authority is
//! configured, anonymous otherwise.

use std::sync::Arc;

use axum::{Extension, Json, Router, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::debug;

use crate::auth::{AuthenticatedCaller, BearerValidator, require_bearer};
use crate::forecast::{self, WeatherForecast};

/// Create the downstream router.
///
/// `None` leaves every route anonymous.
pub fn create_router(validator: Option<Arc<BearerValidator>>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/weatherforecast", get(weather_handler));

    let router = match validator {
        Some(validator) => router.layer(middleware::from_fn_with_state(validator, require_bearer)),
        None => router,
    };

    router
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "downstream" }))
}

async fn weather_handler(caller: Option<Extension<AuthenticatedCaller>>) -> Json<Vec<WeatherForecast>> {
    if let Some(Extension(caller)) = caller {
        debug!(subject = %caller.subject, app = ?caller.client_app_id, "Serving forecast");
    }
    Json(forecast::generate())
}
