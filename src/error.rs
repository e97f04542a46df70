//! # Error Handling
//!
//! HTTP-facing error type and how each variant becomes a response.
//! Domain errors (`DetectionError`, `InitError`, `SessionError`) live next to the
//! code that produces them and are converted here at the HTTP boundary.
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500)
//! - **BadRequest / ValidationError**: Client sent invalid data (400)
//! - **Unauthorized**: Missing or wrong bearer token (401)
//! - **PayloadTooLarge**: Upload over the configured limit (413)
//! - **RateLimited**: Too many requests from one client (429)

use crate::detection::DetectionError;
use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("lat must be between -90 and 90".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (temp file failures, engine failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Bearer token missing or wrong
    Unauthorized(String),

    /// Request body exceeds the upload limit
    PayloadTooLarge(String),

    /// Client exceeded its request budget
    RateLimited(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Too many requests: {}", msg),
        }
    }
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::RateLimited(_) => "rate_limited",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::Unauthorized(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::RateLimited(msg) => msg,
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "lat must be between -90 and 90",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let AppError::Unauthorized(_) = self {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }

        response.json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Engine and temp file failures are server-side: 500 with the failure text.
impl From<DetectionError> for AppError {
    fn from(err: DetectionError) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::PayloadTooLarge("x".into()).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::RateLimited("x".into()).status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_unauthorized_sets_challenge_header() {
        let response = AppError::Unauthorized("Invalid token".into()).error_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn test_detection_error_is_internal() {
        let err: AppError = DetectionError::Engine("boom".into()).into();
        assert!(matches!(err, AppError::Internal(ref m) if m.contains("boom")));
    }
}
