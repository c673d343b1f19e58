//! Persistent per-file status tracking: records, the state machine, and statistics.

mod sqlite;
pub mod stats;
pub mod transitions;
pub mod types;

pub(crate) use sqlite::now_rfc3339;
pub use sqlite::StatusStore;
pub use stats::{BatchTotals, Statistics, StatusBucket};
pub use types::{
    BatchRecord, BatchStatus, EmbeddingRecord, FailureKind, FileRecord, FileStatus, NewEmbedding,
    NewFile, Registration, StatusUpdate, StoreError,
};
