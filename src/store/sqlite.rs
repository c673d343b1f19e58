//! SQLite-backed status store.
//!
//! A single connection guarded by a mutex serializes every operation, which gives the two
//! guarantees the pipeline relies on: concurrent registrations of the same content hash
//! produce exactly one winner, and retry-count increments are never lost. Multi-row writes
//! additionally run inside a transaction so a crash never leaves half an update behind.

use super::transitions::is_allowed;
use super::types::{
    BatchRecord, BatchStatus, EmbeddingRecord, FailureKind, FileRecord, FileStatus, NewEmbedding,
    NewFile, ParseEnumError, Registration, StatusUpdate, StoreError,
};
use crate::hashing::ContentHash;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, name, source_path, content_hash, size_bytes, file_type, status, \
     object_storage_url, error_message, error_kind, retry_count, created_at, updated_at";

const EMBEDDING_COLUMNS: &str =
    "id, file_id, page_number, vector_reference, dimension, token_count, created_at";

const BATCH_COLUMNS: &str = "id, started_at, ended_at, total_files, success_count, failure_count, \
     status, error_summary";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        content_hash TEXT NOT NULL UNIQUE,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        file_type TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        object_storage_url TEXT,
        error_message TEXT,
        error_kind TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);
    CREATE INDEX IF NOT EXISTS idx_files_source_path ON files(source_path);

    CREATE TABLE IF NOT EXISTS embeddings (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        page_number INTEGER NOT NULL CHECK (page_number >= 1),
        vector_reference TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        token_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (file_id, page_number)
    );

    CREATE INDEX IF NOT EXISTS idx_embeddings_vector_reference ON embeddings(vector_reference);

    CREATE TABLE IF NOT EXISTS batches (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        total_files INTEGER NOT NULL,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'running',
        error_summary TEXT
    );
"#;

/// Persistent owner of file, embedding, and batch records.
pub struct StatusStore {
    pub(super) conn: Mutex<Connection>,
    max_retries: u32,
}

impl StatusStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>, max_retries: u32) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn, max_retries)?;
        tracing::info!(path = %path.display(), max_retries, "Status store opened");
        Ok(store)
    }

    /// Create a private in-memory database; used by tests and dry runs.
    pub fn in_memory(max_retries: u32) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, max_retries)
    }

    fn with_connection(conn: Connection, max_retries: u32) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_retries,
        })
    }

    /// Retry cap enforced on the `failed -> pending` edge.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Insert a `pending` record unless the content hash is already known.
    ///
    /// This is the only place deduplication is decided. When the hash exists the stored
    /// record is returned untouched with `created == false`.
    pub fn register_if_absent(&self, file: &NewFile) -> Result<Registration, StoreError> {
        let conn = self.conn.lock();
        let now = now_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO files (id, name, source_path, content_hash, size_bytes, file_type, \
             status, retry_count, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7) \
             ON CONFLICT(content_hash) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                file.name,
                file.source_path,
                file.content_hash.as_str(),
                file.size_bytes as i64,
                file.file_type,
                now,
            ],
        )?;
        let record = query_file(&conn, "content_hash", file.content_hash.as_str())?
            .ok_or_else(|| StoreError::NotFound(file.content_hash.to_string()))?;

        if inserted == 1 {
            tracing::info!(
                file_id = %record.id,
                content_hash = %file.content_hash.short(),
                name = %file.name,
                "Registered file"
            );
        } else {
            tracing::debug!(
                file_id = %record.id,
                content_hash = %file.content_hash.short(),
                status = %record.status,
                "Content hash already registered"
            );
        }

        Ok(Registration {
            created: inserted == 1,
            record,
        })
    }

    /// Move a record to `target`, rejecting edges that the state machine does not allow.
    ///
    /// A transition into `failed` increments `retry_count` exactly once and stores the
    /// failure details from `update`. A transition into `completed` clears them.
    pub fn transition(
        &self,
        id: &str,
        target: FileStatus,
        update: StatusUpdate,
    ) -> Result<FileRecord, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current =
            query_file(&tx, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.check_transition(&current, target)?;

        let now = now_rfc3339();
        match target {
            FileStatus::Failed => {
                let (kind, message) = update
                    .failure
                    .unwrap_or((FailureKind::State, "unspecified failure".to_string()));
                tx.execute(
                    "UPDATE files SET status = ?1, error_message = ?2, error_kind = ?3, \
                     retry_count = retry_count + 1, updated_at = ?4 WHERE id = ?5",
                    params![target.as_str(), message, kind.as_str(), now, id],
                )?;
            }
            FileStatus::Completed => {
                tx.execute(
                    "UPDATE files SET status = ?1, error_message = NULL, error_kind = NULL, \
                     object_storage_url = COALESCE(?2, object_storage_url), updated_at = ?3 \
                     WHERE id = ?4",
                    params![target.as_str(), update.object_storage_url, now, id],
                )?;
            }
            _ => {
                tx.execute(
                    "UPDATE files SET status = ?1, \
                     object_storage_url = COALESCE(?2, object_storage_url), updated_at = ?3 \
                     WHERE id = ?4",
                    params![target.as_str(), update.object_storage_url, now, id],
                )?;
            }
        }

        let updated =
            query_file(&tx, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;

        tracing::debug!(
            file_id = id,
            from = %current.status,
            to = %target,
            retry_count = updated.retry_count,
            "Status transition"
        );
        Ok(updated)
    }

    /// Persist page embeddings and mark the file `completed` in one transaction.
    ///
    /// Any embedding records left by an earlier attempt are replaced. Pages must be supplied
    /// in order as `1..=n`.
    pub fn complete_with_embeddings(
        &self,
        id: &str,
        pages: &[NewEmbedding],
    ) -> Result<(FileRecord, Vec<EmbeddingRecord>), StoreError> {
        let contiguous = !pages.is_empty()
            && pages
                .iter()
                .enumerate()
                .all(|(index, page)| page.page_number as usize == index + 1);
        if !contiguous {
            return Err(StoreError::NonContiguousPages(id.to_string()));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current =
            query_file(&tx, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.check_transition(&current, FileStatus::Completed)?;

        let now = now_rfc3339();
        tx.execute("DELETE FROM embeddings WHERE file_id = ?1", params![id])?;
        let mut records = Vec::with_capacity(pages.len());
        {
            let mut insert = tx.prepare(
                "INSERT INTO embeddings (id, file_id, page_number, vector_reference, dimension, \
                 token_count, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for page in pages {
                let record = EmbeddingRecord {
                    id: Uuid::new_v4().to_string(),
                    file_id: id.to_string(),
                    page_number: page.page_number,
                    vector_reference: page.vector_reference.clone(),
                    dimension: page.dimension,
                    token_count: page.token_count,
                    created_at: now.clone(),
                };
                insert.execute(params![
                    record.id,
                    record.file_id,
                    record.page_number,
                    record.vector_reference,
                    record.dimension,
                    record.token_count,
                    record.created_at,
                ])?;
                records.push(record);
            }
        }
        tx.execute(
            "UPDATE files SET status = 'completed', error_message = NULL, error_kind = NULL, \
             updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        let updated =
            query_file(&tx, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;

        tracing::debug!(file_id = id, pages = records.len(), "File completed");
        Ok((updated, records))
    }

    /// Fetch a record by identifier.
    pub fn get(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        Ok(query_file(&conn, "id", id)?)
    }

    /// Fetch a record by content hash.
    pub fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        Ok(query_file(&conn, "content_hash", hash.as_str())?)
    }

    /// Records in `status`, oldest first, optionally capped at `limit`.
    pub fn list_by_status(
        &self,
        status: FileStatus,
        limit: Option<usize>,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        let limit = limit.map(|value| value as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE status = ?1 \
             ORDER BY created_at, id LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(params![status.as_str(), limit], row_to_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Failed records whose `retry_count` is still below `max_retries`.
    pub fn list_failed(&self, max_retries: u32) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE status = 'failed' AND retry_count < ?1 \
             ORDER BY updated_at, id"
        ))?;
        let records = stmt
            .query_map(params![max_retries], row_to_file)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Return every record left in an in-flight state by a dead run to `pending`.
    ///
    /// Must run once at the start of a batch, before any work is selected.
    pub fn reset_orphaned_processing(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let reset = conn.execute(
            "UPDATE files SET status = 'pending', updated_at = ?1 \
             WHERE status IN ('processing', 'uploaded', 'converting', 'embedding')",
            params![now_rfc3339()],
        )?;
        if reset > 0 {
            tracing::info!(reset, "Reclaimed orphaned in-flight files");
        }
        Ok(reset)
    }

    /// Embedding records of a file ordered by page number.
    pub fn embeddings_for_file(&self, file_id: &str) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EMBEDDING_COLUMNS} FROM embeddings WHERE file_id = ?1 ORDER BY page_number"
        ))?;
        let records = stmt
            .query_map(params![file_id], row_to_embedding)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Remove a file together with its embedding records. Returns `false` when absent.
    pub fn delete_file(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM embeddings WHERE file_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        tx.commit()?;
        if deleted > 0 {
            tracing::info!(file_id = id, "Deleted file record");
        }
        Ok(deleted > 0)
    }

    /// Open a batch with its work-set size fixed.
    pub fn create_batch(&self, total_files: u32) -> Result<BatchRecord, StoreError> {
        let conn = self.conn.lock();
        let record = BatchRecord {
            id: Uuid::new_v4().to_string(),
            started_at: now_rfc3339(),
            ended_at: None,
            total_files,
            success_count: 0,
            failure_count: 0,
            status: BatchStatus::Running,
            error_summary: None,
        };
        conn.execute(
            "INSERT INTO batches (id, started_at, total_files, success_count, failure_count, \
             status) VALUES (?1, ?2, ?3, 0, 0, 'running')",
            params![record.id, record.started_at, record.total_files],
        )?;
        Ok(record)
    }

    /// Write the final counters of a running batch. A closed batch is never rewritten.
    pub fn finish_batch(
        &self,
        id: &str,
        success_count: u32,
        failure_count: u32,
        error_summary: Option<String>,
    ) -> Result<BatchRecord, StoreError> {
        let status = if failure_count == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Partial
        };
        self.close_batch(id, success_count, failure_count, status, error_summary)
    }

    /// Close a batch that stopped early; it is always recorded as `partial`.
    pub fn abort_batch(
        &self,
        id: &str,
        success_count: u32,
        failure_count: u32,
        error_summary: String,
    ) -> Result<BatchRecord, StoreError> {
        self.close_batch(
            id,
            success_count,
            failure_count,
            BatchStatus::Partial,
            Some(error_summary),
        )
    }

    fn close_batch(
        &self,
        id: &str,
        success_count: u32,
        failure_count: u32,
        status: BatchStatus,
        error_summary: Option<String>,
    ) -> Result<BatchRecord, StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE batches SET ended_at = ?1, success_count = ?2, failure_count = ?3, \
             status = ?4, error_summary = ?5 WHERE id = ?6 AND status = 'running'",
            params![
                now_rfc3339(),
                success_count,
                failure_count,
                status.as_str(),
                error_summary,
                id
            ],
        )?;
        let record = query_batch(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if updated == 0 {
            return Err(StoreError::BatchClosed(id.to_string()));
        }
        Ok(record)
    }

    /// Fetch a batch by identifier.
    pub fn get_batch(&self, id: &str) -> Result<Option<BatchRecord>, StoreError> {
        let conn = self.conn.lock();
        Ok(query_batch(&conn, id)?)
    }

    fn check_transition(&self, current: &FileRecord, target: FileStatus) -> Result<(), StoreError> {
        let from = current.status;
        let retry_blocked = from == FileStatus::Failed
            && target == FileStatus::Pending
            && current.retry_count >= self.max_retries;
        if !is_allowed(from, target) || retry_blocked {
            return Err(StoreError::InvalidTransition {
                id: current.id.clone(),
                from,
                to: target,
            });
        }
        Ok(())
    }
}

/// Current UTC time formatted for storage.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn query_file(
    conn: &Connection,
    column: &'static str,
    value: &str,
) -> rusqlite::Result<Option<FileRecord>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE {column} = ?1"),
        params![value],
        row_to_file,
    )
    .optional()
}

fn query_batch(conn: &Connection, id: &str) -> rusqlite::Result<Option<BatchRecord>> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
        params![id],
        row_to_batch,
    )
    .optional()
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let hash: String = row.get(3)?;
    let content_hash = ContentHash::parse(&hash).ok_or_else(|| {
        invalid_column(
            3,
            ParseEnumError {
                kind: "content hash",
                value: hash.clone(),
            },
        )
    })?;
    let status: String = row.get(6)?;
    let error_kind: Option<String> = row.get(9)?;

    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        source_path: row.get(2)?,
        content_hash,
        size_bytes: row.get::<_, i64>(4)?.max(0) as u64,
        file_type: row.get(5)?,
        status: status
            .parse::<FileStatus>()
            .map_err(|err| invalid_column(6, err))?,
        object_storage_url: row.get(7)?,
        error_message: row.get(8)?,
        error_kind: error_kind
            .map(|value| value.parse::<FailureKind>())
            .transpose()
            .map_err(|err| invalid_column(9, err))?,
        retry_count: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn row_to_embedding(row: &Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
    Ok(EmbeddingRecord {
        id: row.get(0)?,
        file_id: row.get(1)?,
        page_number: row.get(2)?,
        vector_reference: row.get(3)?,
        dimension: row.get(4)?,
        token_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_batch(row: &Row<'_>) -> rusqlite::Result<BatchRecord> {
    let status: String = row.get(6)?;
    Ok(BatchRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        total_files: row.get(3)?,
        success_count: row.get(4)?,
        failure_count: row.get(5)?,
        status: status
            .parse::<BatchStatus>()
            .map_err(|err| invalid_column(6, err))?,
        error_summary: row.get(7)?,
    })
}

fn invalid_column(index: usize, err: ParseEnumError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
