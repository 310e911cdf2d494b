use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the limiter, its configuration and the admin surface.
///
/// None of these ever reach a guarded business handler: store faults are
/// absorbed by the guard (fail open) and configuration errors stop startup.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Counter store fault: {0}")]
    StoreFault(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid policy file: {0}")]
    PolicyFile(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LimiterError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_limiter_error(err: &LimiterError) -> Self {
        match err {
            LimiterError::InvalidRequest(msg) => Self::new("bad_request", msg, 400),
            LimiterError::Unauthorized(msg) => Self::new("unauthorized", msg, 401),
            LimiterError::Configuration(msg) => Self::new("configuration_error", msg, 500),
            // Internal detail stays in the log.
            LimiterError::StoreFault(_) | LimiterError::PolicyFile(_) | LimiterError::Io(_) => {
                Self::new("internal_error", "Internal server error", 500)
            }
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_limiter_error(&self);
        if body.code >= 500 {
            tracing::error!(target: "auth_throttle::error", error = %self, "Admin request failed");
        }
        let status = StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
