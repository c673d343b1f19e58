//! Qdrant vector store integration.

pub mod client;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use payload::{PagePayload, build_payload, vector_reference};
pub use types::{CollectionInfo, QdrantError, VectorIndex, VectorPoint};
