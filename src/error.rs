//! # Error Handling
//!
//! Custom error types for the job service and their conversion to HTTP
//! responses. The error taxonomy distinguishes outcomes the caller is
//! expected to handle (queue backpressure, unknown ids, late cancellations)
//! from genuine defects (illegal state transitions).
//!
//! ## Error Categories:
//! - **NotFound**: unknown or evicted job id (404)
//! - **QueueFull**: admission rejected by the capacity bound — expected
//!   backpressure, not a bug (503 + Retry-After)
//! - **TooLate**: cancellation attempted after the job already reached a
//!   terminal state (409)
//! - **IllegalTransition**: a state-machine violation; legal call sequences
//!   can never trigger it, so it is logged loudly and surfaced only as a
//!   generic internal error (500)
//! - **BadRequest / ValidationError**: client-side input problems (400)
//! - **Internal / ConfigError**: server-side problems (500)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::jobs::JobState;

/// Custom error types for the application.
///
/// All fallible handler and core operations return this type; the
/// `ResponseError` impl below maps each variant to a transport response.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (lock poisoning, io failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested job id is unknown or has been evicted
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The queue is at capacity; the caller should retry later
    QueueFull { capacity: usize },

    /// Cancellation arrived after the job already reached a terminal state
    TooLate { id: uuid::Uuid, state: JobState },

    /// A state transition not permitted by the lifecycle graph was attempted.
    /// Indicates a core defect or a lost race, never a caller mistake.
    IllegalTransition {
        id: uuid::Uuid,
        from: JobState,
        to: JobState,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::QueueFull { capacity } => {
                write!(f, "Queue full: capacity of {} queued jobs reached", capacity)
            }
            AppError::TooLate { id, state } => {
                write!(f, "Too late to cancel job {}: already {}", id, state)
            }
            AppError::IllegalTransition { id, from, to } => {
                write!(f, "Illegal transition for job {}: {} -> {}", id, from, to)
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // An illegal transition means a core invariant was violated. Log the
        // detail here and hand the client only a generic internal error.
        if let AppError::IllegalTransition { id, from, to } = self {
            tracing::error!(
                job_id = %id,
                from = %from,
                to = %to,
                "Illegal job state transition attempted"
            );
            return HttpResponse::InternalServerError().json(json!({
                "error": {
                    "type": "internal_error",
                    "message": "Internal error",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                }
            }));
        }

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::QueueFull { .. } => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "queue_full",
                self.to_string(),
            ),
            AppError::TooLate { .. } => (
                actix_web::http::StatusCode::CONFLICT,
                "too_late",
                self.to_string(),
            ),
            AppError::IllegalTransition { .. } => unreachable!("handled above"),
        };

        let mut builder = HttpResponse::build(status);
        if matches!(self, AppError::QueueFull { .. }) {
            // Explicit retry-later signal for backpressure rejections
            builder.insert_header(("Retry-After", "30"));
        }

        builder.json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl std::error::Error for AppError {}

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

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_queue_full_maps_to_service_unavailable() {
        let err = AppError::QueueFull { capacity: 8 };
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().contains_key("Retry-After"));
    }

    #[test]
    fn test_too_late_maps_to_conflict() {
        let err = AppError::TooLate {
            id: uuid::Uuid::new_v4(),
            state: JobState::Done,
        };
        assert_eq!(err.error_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_illegal_transition_is_opaque_internal_error() {
        let err = AppError::IllegalTransition {
            id: uuid::Uuid::new_v4(),
            from: JobState::Done,
            to: JobState::Running,
        };
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = AppError::NotFound("no such job".to_string());
        assert_eq!(err.error_response().status(), StatusCode::NOT_FOUND);
    }
}
