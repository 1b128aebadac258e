use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use manifold_core::{EngineError, ErrorKind};

/// HTTP-facing error with a standard `{ "error": message }` body.
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &str) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (status, message) = self.parts();
        write!(f, "{status}: {message}")
    }
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl From<manifold_store::StoreError> for ApiError {
    fn from(err: manifold_store::StoreError) -> Self {
        match err {
            manifold_store::StoreError::NotFound(what) => ApiError::NotFound(what),
            manifold_store::StoreError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err.kind {
            ErrorKind::Validation | ErrorKind::Transformation => {
                ApiError::BadRequest(err.message)
            }
            ErrorKind::Auth => ApiError::Unauthorized(err.message),
            _ => ApiError::Internal(err.message),
        }
    }
}

impl From<manifold_vault::VaultError> for ApiError {
    fn from(err: manifold_vault::VaultError) -> Self {
        use manifold_vault::VaultError as V;
        match &err {
            V::InvalidSeed(_) | V::SchemaViolation(_) => ApiError::BadRequest(err.to_string()),
            V::NotInitialized | V::AlreadyInitialized => ApiError::Conflict(err.to_string()),
            V::Locked | V::BadSeed | V::LockedOut { .. } => {
                ApiError::Unauthorized(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
