// Error handling module
// Errors surfaced to callers of the authenticated pipeline

use reqwest::StatusCode;
use thiserror::Error;

use crate::request::ApiResponse;
use crate::transport::TransportError;

/// Errors that can occur while sending a request through the pipeline
#[derive(Error, Debug)]
pub enum ApiError {
    /// No new credentials could be obtained; the session has been torn down
    #[error("Session expired, please log in again")]
    SessionExpired,

    /// 401 from a public or external endpoint, passed through as received
    #[error("Authentication rejected: {}", .0.status)]
    Unauthorized(ApiResponse),

    /// 401 on the single replay after a successful refresh
    #[error("Request rejected after token refresh: {}", .0.status)]
    ReplayRejected(ApiResponse),

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request path could not be turned into a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(response) | ApiError::ReplayRejected(response) => {
                Some(response.status)
            }
            ApiError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            ApiError::Transport(_) | ApiError::InvalidUrl(_) => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ApiError>;
