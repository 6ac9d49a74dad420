use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};

use foodcache_core::ProductRecord;

use crate::error::ApiError;
use crate::models::SearchParams;
use crate::state::AppState;

pub async fn search(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    let Query(params) = params?;
    let records = state.cache.search(&params.query, params.limit)?;
    Ok(Json(records))
}
