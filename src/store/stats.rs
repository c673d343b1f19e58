//! Read-only aggregation over the status store.

use super::sqlite::StatusStore;
use super::types::{FileStatus, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;

/// Count and total size of the files sharing one status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBucket {
    /// Number of files.
    pub count: u64,
    /// Sum of `size_bytes`.
    pub total_size: u64,
}

/// Aggregated batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    /// Number of batch runs recorded.
    pub total: u64,
    /// Sum of per-batch success counts.
    pub successful_files: u64,
    /// Sum of per-batch failure counts.
    pub failed_files: u64,
}

/// Snapshot returned by [`StatusStore::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Files grouped by status; statuses with no files are omitted.
    pub files: BTreeMap<FileStatus, StatusBucket>,
    /// Number of distinct fingerprints ever registered and not deleted.
    pub total_files: u64,
    /// Number of embedding records.
    pub embeddings_total: u64,
    /// Batch aggregates.
    pub batches: BatchTotals,
}

impl StatusStore {
    /// Group files by status and total up embeddings and batches.
    ///
    /// All three reads happen under one lock acquisition, so the snapshot is consistent.
    pub fn statistics(&self) -> Result<Statistics, StoreError> {
        let conn = self.conn.lock();

        let mut files = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*), COALESCE(SUM(size_bytes), 0) FROM files GROUP BY status",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (status, count, total_size) = row?;
                match status.parse::<FileStatus>() {
                    Ok(status) => {
                        files.insert(
                            status,
                            StatusBucket {
                                count: count as u64,
                                total_size: total_size as u64,
                            },
                        );
                    }
                    Err(err) => tracing::warn!(error = %err, "Skipping unknown status in statistics"),
                }
            }
        }

        let embeddings_total: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        let batches = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success_count), 0), COALESCE(SUM(failure_count), 0) \
             FROM batches",
            [],
            |row| {
                Ok(BatchTotals {
                    total: row.get::<_, i64>(0)? as u64,
                    successful_files: row.get::<_, i64>(1)? as u64,
                    failed_files: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;

        let total_files = files.values().map(|bucket| bucket.count).sum();
        Ok(Statistics {
            files,
            total_files,
            embeddings_total: embeddings_total as u64,
            batches,
        })
    }
}
