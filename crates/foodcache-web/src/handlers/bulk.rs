use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use foodcache_core::{ProductCandidate, ProductRecord};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /foods/bulk`: upsert a JSON array of candidates as one batch.
pub async fn bulk_upsert(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<ProductCandidate>>, JsonRejection>,
) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    let Json(items) = payload?;
    let records = state.cache.bulk_ingest(&items)?;
    Ok(Json(records))
}
