use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};

use foodcache_core::{CacheError, ProductRecord};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /foods/{barcode}`: read-through lookup.
pub async fn get_food(
    State(state): State<Arc<AppState>>,
    Path(barcode): Path<String>,
) -> Result<Json<ProductRecord>, ApiError> {
    let record = state.cache.lookup(&barcode).await?;
    Ok(Json(record))
}

/// `POST /foods/{barcode}/refresh`: bypass the cache and re-fetch.
pub async fn refresh_food(
    State(state): State<Arc<AppState>>,
    Path(barcode): Path<String>,
) -> Result<Json<ProductRecord>, ApiError> {
    match state.cache.force_refresh(&barcode).await {
        Ok(record) => Ok(Json(record)),
        Err(CacheError::NotFound { .. }) => Err(ApiError::NotFound(
            "Barcode not found in OpenFoodFacts".into(),
        )),
        Err(e) => Err(e.into()),
    }
}
