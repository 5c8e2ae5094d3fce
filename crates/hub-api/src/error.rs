use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Control-API error with an explicit HTTP status.
///
/// Handlers decide the status from context (missing artifact → 404,
/// reference/lifecycle conflicts → 409, parse failures → 400) instead of
/// introspecting error internals.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(e: impl ToString) -> Self {
        Self::BadRequest(e.to_string())
    }

    pub fn not_found(kind: impl std::fmt::Display, id: &str) -> Self {
        Self::NotFound(format!("{kind} {id:?} does not exist"))
    }

    pub fn conflict(e: impl ToString) -> Self {
        Self::Conflict(e.to_string())
    }

    pub fn internal(e: impl ToString) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
