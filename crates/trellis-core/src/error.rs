//! Error types for the API boundary and the task board.

use thiserror::Error;

/// Failure reported by a [`crate::api::TaskApi`] backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never got a response.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("api returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The record does not exist (stale or unknown id).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response payload: {0}")]
    Decode(String),

    /// Local document store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn not_found(what: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{what} {id}"))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(format!("{err:#}"))
    }
}

/// Failure of a board operation.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Rejected before any remote call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl BoardError {
    pub fn is_validation(&self) -> bool {
        matches!(self, BoardError::Validation(_))
    }
}

pub type BoardResult<T> = Result<T, BoardError>;
