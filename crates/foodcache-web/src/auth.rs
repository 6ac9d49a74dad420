//! Shared-secret gate for mutating routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// Reject the request unless `X-Service-Key` matches the configured key.
/// With no key configured every request passes.
pub async fn require_service_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.service_api_key() {
        let provided = request
            .headers()
            .get(SERVICE_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            tracing::warn!(
                path = %request.uri().path(),
                key_present = provided.is_some(),
                "rejected request without a valid service key"
            );
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}
