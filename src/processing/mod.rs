//! Document ingestion: the per-file pipeline, batch orchestration, and the caller-facing service.

pub mod batch;
pub mod pipeline;
mod service;
pub mod types;

pub use batch::BatchOrchestrator;
pub use pipeline::{Adapters, FilePipeline, PipelineSettings};
pub use service::{IngestApi, IngestService};
pub use types::{
    BatchOptions, BatchSummary, DeleteAck, FileOutcome, FileResult, HealthSnapshot, IngestError,
    SkipReason, WorkItem,
};
