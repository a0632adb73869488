//! Error types for release-remote

use thiserror::Error;

/// Errors that can occur talking to the token service or the comment API
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("{context}: {message}")]
    Status {
        context: String,
        status: u16,
        message: String,
    },

    /// Token service answered 2xx without a token
    #[error("Response did not contain a token")]
    MissingToken,

    /// Every token attempt failed
    #[error("Failed to get token after {attempts} attempts. Last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Repository is not in `owner/repo` form
    #[error("Invalid repository identifier: {0}")]
    InvalidRepository(String),

    /// Base URL could not be parsed or joined
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Http(err.to_string())
    }
}
