//! Result and option types exchanged with the file pipeline and batch orchestrator.

use crate::error::AdapterError;
use crate::hashing::ContentHash;
use crate::store::{BatchStatus, FailureKind, FileRecord, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the ingestion service to its callers.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Status store rejected the request or is unavailable.
    #[error("Status store request failed: {0}")]
    Store(#[from] StoreError),
    /// An external adapter failed outside a file pipeline (deletion, listing, bootstrap).
    #[error("Adapter request failed: {0}")]
    Adapter(#[from] AdapterError),
    /// Caller supplied a malformed argument.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<crate::qdrant::QdrantError> for IngestError {
    fn from(err: crate::qdrant::QdrantError) -> Self {
        Self::Adapter(err.into())
    }
}

/// Why a file was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The content is already tracked and was not eligible for another attempt.
    Duplicate,
    /// The tracked record changed state before this run could claim it.
    NotEligible,
}

/// Per-file outcome, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    /// File reached `completed`.
    Success {
        /// Tracked record.
        file_id: String,
        /// Content fingerprint.
        content_hash: ContentHash,
        /// Number of embedded pages.
        pages_processed: u32,
        /// Point identifiers written to the vector index, in page order.
        vector_ids: Vec<String>,
        /// Archive location of the original bytes.
        object_url: Option<String>,
    },
    /// The attempt ended in `failed`, or the download failed before a record existed.
    Failed {
        /// Tracked record, absent when the file could not be fetched.
        file_id: Option<String>,
        /// Content fingerprint, absent when the file could not be fetched.
        content_hash: Option<ContentHash>,
        /// Failure classification.
        error_kind: FailureKind,
        /// Human-readable message.
        error: String,
    },
    /// Nothing was done for this file.
    Skipped {
        /// Record that already owns the content.
        file_id: String,
        /// Content fingerprint.
        content_hash: ContentHash,
        /// Why the file was skipped.
        reason: SkipReason,
    },
}

/// Outcome of one file together with the locator it was requested under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResult {
    /// Source locator.
    pub locator: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileResult {
    /// Whether the file completed.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FileOutcome::Success { .. })
    }

    /// Whether the attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Failed { .. })
    }

    /// Whether the file was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, FileOutcome::Skipped { .. })
    }

    /// Record identifier, when one exists.
    pub fn file_id(&self) -> Option<&str> {
        match &self.outcome {
            FileOutcome::Success { file_id, .. } | FileOutcome::Skipped { file_id, .. } => {
                Some(file_id)
            }
            FileOutcome::Failed { file_id, .. } => file_id.as_deref(),
        }
    }

    /// Failure message, for failed results.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FileOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Knobs of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Skip files whose content is already tracked under another locator.
    pub skip_duplicates: bool,
    /// Also pick up `pending` and retryable `failed` records from earlier runs.
    pub resume: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
            resume: false,
        }
    }
}

impl BatchOptions {
    /// Default options with resumption of earlier work switched on.
    pub fn resuming() -> Self {
        Self {
            resume: true,
            ..Self::default()
        }
    }
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Persisted batch identifier.
    pub batch_id: String,
    /// Size of the work set (supplied files plus resumed records).
    pub total_files: u32,
    /// Files that completed.
    pub successful: u32,
    /// Files that failed.
    pub failed: u32,
    /// Files skipped.
    pub skipped: u32,
    /// Records picked up from earlier runs.
    pub resumed: u32,
    /// Final batch status.
    pub status: BatchStatus,
    /// Per-file results in work-set order.
    pub results: Vec<FileResult>,
}

/// One unit of batch work.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// A locator supplied by the caller.
    Fresh {
        /// Source locator.
        locator: String,
    },
    /// A record left `pending` or retryably `failed` by an earlier run.
    Resume {
        /// Stored record to pick up.
        record: FileRecord,
    },
}

impl WorkItem {
    /// Locator the bytes are fetched from.
    pub fn locator(&self) -> &str {
        match self {
            Self::Fresh { locator } => locator,
            Self::Resume { record } => &record.source_path,
        }
    }
}

/// Acknowledgement of a document deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteAck {
    /// Removed record.
    pub file_id: String,
    /// Whether page vectors were removed from the index as well.
    pub vectors_deleted: bool,
    /// Embedding records removed together with the file record.
    pub embeddings_removed: usize,
}

/// Liveness of the status store and the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// Whether the status store answered a read.
    pub store_ok: bool,
    /// Whether the vector index answered a collection lookup.
    pub index_reachable: bool,
    /// Points stored in the collection, when reachable.
    pub indexed_points: Option<u64>,
    /// Diagnostic messages captured from failing probes.
    pub errors: Vec<String>,
}

impl HealthSnapshot {
    /// Every dependency answered.
    pub fn is_healthy(&self) -> bool {
        self.store_ok && self.index_reachable
    }
}
