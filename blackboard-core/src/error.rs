//! Error taxonomy shared by storage, server and dispatch layers.
//!
//! `ErrorKind` is the *kind*, not a type per failure mode (per the
//! specification's "taxonomy (kinds, not types)" framing) — server code maps
//! a `CoreError` straight onto the client-visible `{code, error, details}`
//! envelope without re-deriving the category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error category. Maps 1:1 onto the client-visible `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    AuthFailed,
    InvalidToken,
    TokenExpired,
    Conflict,
    SessionLocked,
    RateLimited,
    DatabaseUnavailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A structured error carrying a kind, a human message, and optional
/// non-secret details. This is the single error type used across the
/// storage, auth and dispatch layers; the server crate renders it into the
/// `{success: false, error, code, details}` envelope.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken, message)
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenExpired, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn session_locked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionLocked, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn database_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

/// Field/value validation failure. A thin, typed alternative to
/// constructing a [`CoreError`] by hand for the common "bad input" path;
/// converts losslessly via `From`.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} is required")]
    Missing { field: String },
}

impl From<ValidationError> for CoreError {
    fn from(e: ValidationError) -> Self {
        CoreError::invalid_input(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_to_invalid_input() {
        let v = ValidationError::Missing {
            field: "content".into(),
        };
        let e: CoreError = v.into();
        assert_eq!(e.kind, ErrorKind::InvalidInput);
    }
}
