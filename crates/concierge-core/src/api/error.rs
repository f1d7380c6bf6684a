use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body shape returned by the backend: `{"error": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull the human-readable message out of an error body, falling back
    /// to the (truncated) raw body.
    fn message_from_body(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self::truncate_body(&parsed.error),
            Err(_) => Self::truncate_body(body),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Wrap a transport error, separating timeouts from other failures.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::NetworkError(err)
        }
    }

    /// Whether the failure is worth retrying later without any change of
    /// credentials (network trouble, overload, server faults).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_)
                | ApiError::Timeout
                | ApiError::RateLimited
                | ApiError::ServerError(_)
                | ApiError::InvalidResponse(_)
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}
