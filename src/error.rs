//! # Error Handling
//!
//! Custom error types for the application and how they're converted to
//! HTTP responses.
//!
//! ## Error Categories:
//! - **AppError**: errors surfaced through the HTTP layer (500/400/404/429)
//! - **ChannelError**: contract violations on the per-session frame channel
//!
//! Session-scoped runtime failures (engine errors, decode failures) are
//! NOT represented here — they travel as `Error` events on the event bus
//! and reach the client as an `ERROR` envelope, per the error taxonomy.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-level error types.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - SessionLimit → 429 (Too Many Requests)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (task failures, poisoned locks, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Maximum concurrent session count reached
    SessionLimit(usize),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SessionLimit(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
        }
    }
}

impl std::error::Error for AppError {}

/// Converts application errors into consistent JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "session_limit",
///     "message": "Maximum concurrent sessions (32) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::Internal(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
            AppError::BadRequest(_) => (actix_web::http::StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (actix_web::http::StatusCode::NOT_FOUND, "not_found"),
            AppError::ConfigError(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
            ),
            AppError::SessionLimit(_) => (
                actix_web::http::StatusCode::TOO_MANY_REQUESTS,
                "session_limit",
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Contract violations on a session's frame channel.
///
/// These indicate a programming error in the caller (the channel is
/// single-consumer by design), not a runtime condition — they must fail
/// fast rather than silently deadlock.
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// A `pull()` was issued while another pull is still outstanding.
    PullInProgress,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::PullInProgress => {
                write!(f, "a pull is already outstanding on this channel")
            }
        }
    }
}

impl std::error::Error for ChannelError {}

/// Type alias for Results that use our application error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::SessionLimit(32);
        assert_eq!(err.to_string(), "Maximum concurrent sessions (32) reached");

        let err = AppError::BadRequest("bad envelope".to_string());
        assert_eq!(err.to_string(), "Bad request: bad envelope");
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::PullInProgress;
        assert!(err.to_string().contains("already outstanding"));
    }
}
