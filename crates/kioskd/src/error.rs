use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// API-boundary error taxonomy.
///
/// Validation and conflict errors are resolved here and never reach
/// storage; engine and storage failures surface as server errors after the
/// coordinators have run their compensation.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("face engine failure: {0}")]
    Engine(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Engine(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "ok": false, "msg": self.to_string() }))).into_response()
    }
}

impl From<kiosk_store::StoreError> for ApiError {
    fn from(err: kiosk_store::StoreError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<crate::engine::EngineError> for ApiError {
    fn from(err: crate::engine::EngineError) -> Self {
        ApiError::Engine(err.to_string())
    }
}

impl From<crate::recognize::RecognizeError> for ApiError {
    fn from(err: crate::recognize::RecognizeError) -> Self {
        match err {
            crate::recognize::RecognizeError::Engine(e) => e.into(),
            crate::recognize::RecognizeError::Store(e) => e.into(),
        }
    }
}
