//! Bearer validation middleware

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::BearerValidator;

/// Extract the token from an `Authorization: Bearer <token>` header value
#[must_use]
pub fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid bearer token.
///
/// On success the [`AuthenticatedCaller`](super::AuthenticatedCaller) is
/// inserted into the request extensions.
pub async fn require_bearer(
    State(validator): State<Arc<BearerValidator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if validator.is_public_path(&path) {
        debug!(path = %path, "Public path, skipping bearer validation");
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        warn!(path = %path, "Missing bearer token");
        return unauthorized_response("Missing Authorization header. Use: Authorization: Bearer <token>");
    };

    match validator.validate(&token).await {
        Ok(caller) => {
            debug!(subject = %caller.subject, app = ?caller.client_app_id, path = %path, "Authenticated request");
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Bearer token rejected");
            unauthorized_response("Invalid token")
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}
