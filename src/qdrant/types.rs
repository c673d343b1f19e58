//! Shared types used by the Qdrant client and the vector index seam.

use crate::error::AdapterError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Qdrant answered successfully but the body did not have the expected shape.
    #[error("Malformed Qdrant response: {0}")]
    Malformed(String),
}

impl From<QdrantError> for AdapterError {
    fn from(err: QdrantError) -> Self {
        match err {
            QdrantError::InvalidUrl(url) => Self::InvalidInput(format!("invalid Qdrant URL: {url}")),
            QdrantError::Http(err) => Self::Http(err),
            QdrantError::UnexpectedStatus { status, body } => {
                Self::UnexpectedStatus { status, body }
            }
            QdrantError::Malformed(message) => Self::InvalidResponse(message),
        }
    }
}

/// One page vector ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Point identifier (UUID string).
    pub id: String,
    /// Embedding values.
    pub vector: Vec<f32>,
    /// Payload stored next to the vector.
    pub payload: Map<String, Value>,
}

/// Summary of the target collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    /// Number of stored points.
    pub count: u64,
    /// Configured vector size, when the collection uses a single unnamed vector.
    pub dimension: Option<u64>,
    /// Configured distance metric.
    pub distance_metric: Option<String>,
}

/// Vector store the pipeline writes page embeddings into.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite `points` in one call, returning once they are durable.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), AdapterError>;

    /// Remove every point whose payload `key` equals `value`.
    async fn delete_by_payload_field(&self, key: &str, value: &str) -> Result<(), AdapterError>;

    /// Describe the collection.
    async fn collection_info(&self) -> Result<CollectionInfo, AdapterError>;
}

#[derive(Deserialize)]
pub(crate) struct CollectionResponse {
    pub(crate) result: CollectionResult,
}

#[derive(Deserialize)]
pub(crate) struct CollectionResult {
    #[serde(default)]
    pub(crate) points_count: Option<u64>,
    #[serde(default)]
    pub(crate) config: Option<CollectionConfig>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionConfig {
    pub(crate) params: CollectionParams,
}

#[derive(Deserialize)]
pub(crate) struct CollectionParams {
    #[serde(default)]
    pub(crate) vectors: Option<Value>,
}
