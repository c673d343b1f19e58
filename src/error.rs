//! Error type shared by the external adapters (source, storage, embedding, vector index).

use reqwest::StatusCode;
use thiserror::Error;

/// Failure reported by an external adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP layer failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Remote service answered with a non-success status.
    #[error("unexpected response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Response body, possibly empty.
        body: String,
    },
    /// Requested object or locator does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Remote service answered with a body we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Caller supplied an argument the adapter cannot act on.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AdapterError {
    /// Build an [`AdapterError::UnexpectedStatus`] from a failed response, consuming its body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::UnexpectedStatus { status, body }
    }
}
