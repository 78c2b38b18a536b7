//! HTTP client error types.

use thiserror::Error;

/// Errors that can occur when making HTTP requests.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Failed to send the request.
    #[error("Request failed: {0}")]
    RequestError(String),

    /// HTTP error response.
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Failed to parse response body.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timeout.
    #[error("Request timed out")]
    Timeout,

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// The API answered with `success: false`.
    #[error("Rejected by API: {message}")]
    Rejected {
        message: String,
        errors: Vec<String>,
    },

    /// The API answered `success: true` without a `data` payload.
    #[error("Response envelope has no data")]
    MissingData,
}

impl FetchError {
    /// Whether the failure happened before a usable answer came back.
    ///
    /// Transport failures are worth retrying; rejections are not.
    pub fn is_transport(&self) -> bool {
        match self {
            FetchError::RequestError(_) | FetchError::Timeout => true,
            FetchError::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::JsonError(e.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::RequestError(e.to_string())
        }
    }
}
