//! HTTP-facing error envelope.
//!
//! Every tool dispatch error and every route error renders through this
//! type, which is a thin `{success:false, error, code, details}` projection
//! of [`blackboard_core::CoreError`] — the taxonomy itself lives in
//! `blackboard-core`; this module only knows how to put it on the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blackboard_core::{CoreError, ErrorKind};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
    pub code: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self {
            success: false,
            error: e.message,
            code: e.kind,
            details: e.details,
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::AuthFailed | ErrorKind::InvalidToken | ErrorKind::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::SessionLocked => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
