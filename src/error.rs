//! Error types returned by the request dispatcher and feed decoders
//!
//! Every failure a caller can see is one of four kinds: the resource was not
//! found, the session was not authorized, the request failed for any other
//! reason (including transport errors and timeouts), or a body could not be
//! decoded into the expected shape.

use thiserror::Error;

/// Errors that can occur when talking to the API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote service answered 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote service answered 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success status, or a transport-level failure
    #[error("Request failed{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    RequestFailed {
        /// HTTP status, if the failure came from a response
        status: Option<u16>,
        /// Diagnostic message
        message: String,
    },

    /// A body or feed entry could not be decoded
    #[error("Failed to decode response: {0}")]
    DecodeFailed(String),
}

impl ApiError {
    /// Returns the HTTP status associated with this error, where known
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound(_) => Some(404),
            ApiError::Unauthorized(_) => Some(401),
            ApiError::RequestFailed { status, .. } => *status,
            ApiError::DecodeFailed(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::RequestFailed {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::DecodeFailed(err.to_string())
    }
}

/// Converts `NotFound` into an absent value for endpoints where a missing
/// resource is a normal outcome.
pub trait NotFoundExt<T> {
    fn optional(self) -> Result<Option<T>, ApiError>;
}

impl<T> NotFoundExt<T> for Result<T, ApiError> {
    fn optional(self) -> Result<Option<T>, ApiError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
