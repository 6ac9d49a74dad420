//! HTTP surface for the food cache.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod models;
pub mod shutdown;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

/// Build the application router. Mutating routes sit behind the
/// service-key gate.
pub fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/foods/bulk", post(handlers::bulk::bulk_upsert))
        .route(
            "/foods/{barcode}/refresh",
            post(handlers::foods::refresh_food),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_service_key,
        ));

    let cors = cors_layer(&state.cache.settings().allowed_origins);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/foods/{barcode}", get(handlers::foods::get_food))
        .route("/search", get(handlers::search::search))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured origins with credentials allowed. Browsers reject
/// wildcard responses on credentialed requests, so `*` mirrors the caller's
/// origin instead.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            }
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
