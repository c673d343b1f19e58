#![deny(missing_docs)]

//! Core library for the pageledger document ingestion engine.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Page converters and the converter registry.
pub mod convert;
/// Page embedding services.
pub mod embedding;
/// Errors shared by external adapters.
pub mod error;
/// Content fingerprinting.
pub mod hashing;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// File pipeline, batch orchestration, and the ingestion service.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Document sources.
pub mod source;
/// Object storage for archived originals.
pub mod storage;
/// SQLite-backed status tracking.
pub mod store;
