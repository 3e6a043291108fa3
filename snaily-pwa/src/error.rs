//! Error types for snaily-pwa
//!
//! `Error` is the crate-wide error. Storage and network variants are soft:
//! the layer that sees them absorbs them and degrades. `ApiError` is the HTTP
//! rendering used by the axum handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Main error type for snaily-pwa
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors outside the cache store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Durable cache could not be read or written
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Durable cache refused a write for lack of space
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transport-level failure reaching the network
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Every tier missed for this word
    #[error("Audio for '{word}' is not available yet")]
    AudioNotReady { word: String },

    /// Playback failed after all retries
    #[error("Playback failed: {0}")]
    PlaybackFailure(String),

    /// Remote endpoint rejected or did not receive a sync item
    #[error("Sync failed: {0}")]
    SyncFailure(String),

    /// Scanned payload is not a phonics card
    #[error("Unrecognized card payload: {0}")]
    UnrecognizedCard(String),

    /// Errors bubbled up from snaily-common
    #[error(transparent)]
    Common(#[from] snaily_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using snaily-pwa Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why a user-visible operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The clip is not cached and could not be fetched yet
    NotReady,
    /// Something broke while playing; retrying may help
    Technical,
}

impl FailureReason {
    /// Message shown to the learner
    pub fn user_message(self) -> &'static str {
        match self {
            FailureReason::NotReady => "This word's audio is still being prepared, please try again later",
            FailureReason::Technical => "Playback failed, please try again",
        }
    }
}

impl Error {
    /// Classify for the learner; `None` for errors that never reach them
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Error::AudioNotReady { .. } => Some(FailureReason::NotReady),
            Error::PlaybackFailure(_) => Some(FailureReason::Technical),
            _ => None,
        }
    }

    /// True for errors callers are expected to absorb and degrade on
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable(_) | Error::QuotaExceeded(_) | Error::NetworkFailure(_)
        )
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. preload already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dependency unreachable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::UnrecognizedCard(_) | Error::Config(_) => ApiError::BadRequest(err.to_string()),
            Error::AudioNotReady { .. } => ApiError::NotFound(err.to_string()),
            Error::StorageUnavailable(_) | Error::NetworkFailure(_) => {
                ApiError::Unavailable(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Result type for HTTP handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_and_technical_are_distinct() {
        let not_ready = Error::AudioNotReady { word: "cat".into() };
        let technical = Error::PlaybackFailure("device lost".into());

        assert_eq!(not_ready.failure_reason(), Some(FailureReason::NotReady));
        assert_eq!(technical.failure_reason(), Some(FailureReason::Technical));
        assert_ne!(
            FailureReason::NotReady.user_message(),
            FailureReason::Technical.user_message()
        );
    }

    #[test]
    fn test_soft_errors() {
        assert!(Error::QuotaExceeded("full".into()).is_soft());
        assert!(Error::NetworkFailure("refused".into()).is_soft());
        assert!(!Error::AudioNotReady { word: "dog".into() }.is_soft());
    }

    #[test]
    fn test_api_error_status_mapping() {
        let resp = ApiError::from(Error::UnrecognizedCard("not-a-card".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(Error::AudioNotReady { word: "cat".into() }).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
