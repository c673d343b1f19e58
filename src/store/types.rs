//! Records, status enums, and errors persisted by the status store.

use crate::hashing::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors returned by status store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested status change is not an edge of the state machine.
    #[error("invalid transition for file {id}: {from} -> {to}")]
    InvalidTransition {
        /// File whose transition was rejected.
        id: String,
        /// Status stored at the time of the request.
        from: FileStatus,
        /// Status the caller asked for.
        to: FileStatus,
    },
    /// Referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
    /// Embedding records did not form a contiguous page sequence starting at 1.
    #[error("embedding pages for file {0} must be contiguous and start at 1")]
    NonContiguousPages(String),
    /// Batch already carries its final counters.
    #[error("batch {0} is already closed")]
    BatchClosed(String),
    /// Underlying SQLite failure; treated as store unavailability.
    #[error("status store unavailable: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether the error signals that the store itself cannot be used.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Lifecycle of an ingested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Registered, waiting to be claimed by a pipeline.
    Pending,
    /// Claimed by a running pipeline.
    Processing,
    /// Original bytes archived in object storage.
    Uploaded,
    /// Page images produced.
    Converting,
    /// Pages are being embedded and upserted.
    Embedding,
    /// Vectors and embedding records durably written.
    Completed,
    /// Last attempt failed; see `error_message` and `retry_count`.
    Failed,
}

impl FileStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [FileStatus; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Uploaded,
        Self::Converting,
        Self::Embedding,
        Self::Completed,
        Self::Failed,
    ];

    /// Stored column value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Uploaded => "uploaded",
            Self::Converting => "converting",
            Self::Embedding => "embedding",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// States a pipeline occupies while it is actively working on a file.
    pub const fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Processing | Self::Uploaded | Self::Converting | Self::Embedding
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a stored enum column holds an unknown value.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub(crate) kind: &'static str,
    pub(crate) value: String,
}

impl FromStr for FileStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "file status",
                value: s.to_string(),
            })
    }
}

/// Classification of the failure that moved a file into `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Document source could not deliver the bytes.
    Download,
    /// Object storage rejected the archive upload.
    Upload,
    /// No registered converter accepts the file.
    UnsupportedFileType,
    /// A converter accepted the file but produced no usable pages.
    Conversion,
    /// Embedding service failed for one of the pages.
    Embedding,
    /// Vector index rejected the upsert.
    VectorIndex,
    /// A stage exceeded its deadline.
    Timeout,
    /// Bytes at the source no longer match the registered fingerprint.
    ContentChanged,
    /// Status store refused a state change for this file.
    State,
}

impl FailureKind {
    const ALL: [FailureKind; 9] = [
        Self::Download,
        Self::Upload,
        Self::UnsupportedFileType,
        Self::Conversion,
        Self::Embedding,
        Self::VectorIndex,
        Self::Timeout,
        Self::ContentChanged,
        Self::State,
    ];

    /// Stored column value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::UnsupportedFileType => "unsupported_file_type",
            Self::Conversion => "conversion",
            Self::Embedding => "embedding",
            Self::VectorIndex => "vector_index",
            Self::Timeout => "timeout",
            Self::ContentChanged => "content_changed",
            Self::State => "state",
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::UnsupportedFileType | Self::ContentChanged)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "failure kind",
                value: s.to_string(),
            })
    }
}

/// One tracked file, unique per content hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Opaque identifier (UUID v4).
    pub id: String,
    /// Display name, usually the source file name.
    pub name: String,
    /// Locator the bytes were fetched from.
    pub source_path: String,
    /// Fingerprint of the content; the dedup key.
    pub content_hash: ContentHash,
    /// Size of the content in bytes.
    pub size_bytes: u64,
    /// Lowercase extension including the dot, or empty.
    pub file_type: String,
    /// Current lifecycle status.
    pub status: FileStatus,
    /// Archive location once uploaded.
    pub object_storage_url: Option<String>,
    /// Message recorded by the most recent failure.
    pub error_message: Option<String>,
    /// Classification of the most recent failure.
    pub error_kind: Option<FailureKind>,
    /// Number of transitions into `failed`.
    pub retry_count: u32,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last status change.
    pub updated_at: String,
}

impl FileRecord {
    /// Whether a pipeline may pick this record up again.
    pub fn is_resumable(&self, max_retries: u32) -> bool {
        match self.status {
            FileStatus::Pending => true,
            FileStatus::Failed => {
                self.retry_count < max_retries
                    && self.error_kind.is_none_or(FailureKind::is_retryable)
            }
            _ => false,
        }
    }
}

/// Data required to register a newly sighted file.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Display name.
    pub name: String,
    /// Source locator.
    pub source_path: String,
    /// Content fingerprint.
    pub content_hash: ContentHash,
    /// Content size in bytes.
    pub size_bytes: u64,
    /// Lowercase extension including the dot.
    pub file_type: String,
}

/// Result of [`crate::store::StatusStore::register_if_absent`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// `true` when this call inserted the record.
    pub created: bool,
    /// The inserted record, or the one that already owned the hash.
    pub record: FileRecord,
}

/// Extra columns written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// Archive location to persist.
    pub object_storage_url: Option<String>,
    /// Failure classification and message; required context for `failed`.
    pub failure: Option<(FailureKind, String)>,
}

impl StatusUpdate {
    /// Status change without extra columns.
    pub fn none() -> Self {
        Self::default()
    }

    /// Record the archive URL alongside the transition.
    pub fn object_url(url: impl Into<String>) -> Self {
        Self {
            object_storage_url: Some(url.into()),
            failure: None,
        }
    }

    /// Failure details for a transition into `failed`.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            object_storage_url: None,
            failure: Some((kind, message.into())),
        }
    }
}

/// One embedded page of a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    /// Identifier (UUID v4).
    pub id: String,
    /// Owning file.
    pub file_id: String,
    /// 1-based page number.
    pub page_number: u32,
    /// Point identifier in the vector index.
    pub vector_reference: String,
    /// Vector length.
    pub dimension: u32,
    /// Tokens or patches reported by the embedding service.
    pub token_count: u32,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Embedding metadata handed to the store after a durable upsert.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    /// 1-based page number.
    pub page_number: u32,
    /// Point identifier in the vector index.
    pub vector_reference: String,
    /// Vector length.
    pub dimension: u32,
    /// Tokens reported by the embedding service.
    pub token_count: u32,
}

/// Outcome state of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Work still in progress (or the run crashed before closing it).
    Running,
    /// Every file succeeded or was skipped.
    Completed,
    /// At least one file failed.
    Partial,
}

impl BatchStatus {
    /// Stored column value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            other => Err(ParseEnumError {
                kind: "batch status",
                value: other.to_string(),
            }),
        }
    }
}

/// One orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    /// Identifier (UUID v4).
    pub id: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 end time, set when the batch closes.
    pub ended_at: Option<String>,
    /// Size of the work set.
    pub total_files: u32,
    /// Files that completed.
    pub success_count: u32,
    /// Files that failed.
    pub failure_count: u32,
    /// Run state.
    pub status: BatchStatus,
    /// Condensed failure messages.
    pub error_summary: Option<String>,
}
