//! HTTP mapping for orchestrator failures.
//!
//! Every error body has the shape `{"detail": "..."}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use foodcache_core::CacheError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("Invalid service key")]
    Unauthorized,
    #[error("Upstream nutrition database error: {0}")]
    Upstream(String),
    #[error("Internal storage error")]
    Storage,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::NotFound { .. } => ApiError::NotFound("Barcode not found".into()),
            CacheError::Validation(msg) => ApiError::Validation(msg),
            CacheError::Upstream(source) => ApiError::Upstream(source.to_string()),
            CacheError::Storage(source) => {
                tracing::error!(error = %source, "storage failure");
                ApiError::Storage
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodcache_core::SourceError;

    #[test]
    fn cache_errors_map_to_statuses() {
        let cases = [
            (
                CacheError::NotFound {
                    barcode: "1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                CacheError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CacheError::Upstream(SourceError::Status(500)),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn upstream_detail_names_the_status() {
        let err = ApiError::from(CacheError::Upstream(SourceError::Status(503)));
        assert_eq!(
            err.to_string(),
            "Upstream nutrition database error: upstream returned HTTP 503"
        );
    }
}
