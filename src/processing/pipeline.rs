//! Single-file executor driving one document through the status state machine.
//!
//! A file goes through three phases:
//!
//! 1. [`FilePipeline::fetch`] downloads and fingerprints the bytes. No store access.
//! 2. [`FilePipeline::admit`] registers the fingerprint, decides between running, resuming,
//!    or skipping, and claims the record (`pending -> processing`). Admission is synchronous
//!    so a caller that admits files in input order gets first-in-order deduplication.
//! 3. [`FilePipeline::execute`] uploads, converts, embeds, upserts and completes.
//!
//! File-local failures become `failed` transitions and a [`FileOutcome::Failed`] result.
//! Only store unavailability escapes as `Err`.

use crate::convert::{ConversionError, ConverterRegistry, file_type_of};
use crate::embedding::{EmbeddingService, PageEmbedding};
use crate::hashing::{ContentHash, fingerprint};
use crate::metrics::PipelineMetrics;
use crate::processing::types::{FileOutcome, FileResult, SkipReason, WorkItem};
use crate::qdrant::{PagePayload, VectorIndex, VectorPoint, build_payload, vector_reference};
use crate::source::DocumentSource;
use crate::storage::ObjectStorage;
use crate::store::{
    FailureKind, FileRecord, FileStatus, NewEmbedding, NewFile, StatusStore, StatusUpdate,
    StoreError, now_rfc3339,
};
use futures_util::{StreamExt, TryStreamExt, stream};
use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// External services a pipeline talks to.
#[derive(Clone)]
pub struct Adapters {
    /// Where original bytes come from.
    pub source: Arc<dyn DocumentSource>,
    /// Archive for original bytes.
    pub storage: Arc<dyn ObjectStorage>,
    /// Page renderers.
    pub converters: Arc<ConverterRegistry>,
    /// Page embedder.
    pub embedder: Arc<dyn EmbeddingService>,
    /// Vector store.
    pub index: Arc<dyn VectorIndex>,
}

/// Tunables of the file pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Prefix of archived object keys.
    pub object_prefix: String,
    /// Deadline applied to each adapter call.
    pub stage_timeout: Duration,
    /// Embedding calls allowed in flight across all files.
    pub embed_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            object_prefix: "documents".to_string(),
            stage_timeout: Duration::from_secs(120),
            embed_concurrency: 2,
        }
    }
}

/// Bytes of one work item, ready for admission.
pub enum Fetched {
    /// Download and fingerprint succeeded.
    Ready {
        /// Work item the bytes belong to.
        item: WorkItem,
        /// File content.
        bytes: Vec<u8>,
        /// Fingerprint of `bytes`.
        content_hash: ContentHash,
    },
    /// Download failed or timed out.
    Unavailable {
        /// Work item that could not be fetched.
        item: WorkItem,
        /// `Download` or `Timeout`.
        kind: FailureKind,
        /// Human-readable cause.
        error: String,
    },
}

/// Decision taken by [`FilePipeline::admit`].
pub enum Admission {
    /// The record is claimed and must be executed.
    Run(ClaimedFile),
    /// Nothing more to do; the result is final.
    Done(FileResult),
}

/// A record this pipeline owns (status `processing`) together with its bytes.
pub struct ClaimedFile {
    locator: String,
    record: FileRecord,
    bytes: Vec<u8>,
}

enum StageError {
    Failed(FailureKind, String),
    Store(StoreError),
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

struct Completed {
    pages: u32,
    vector_ids: Vec<String>,
    object_url: String,
}

/// Executes the per-file state machine against the status store and adapters.
pub struct FilePipeline {
    store: Arc<StatusStore>,
    adapters: Adapters,
    settings: PipelineSettings,
    embed_permits: Arc<Semaphore>,
    metrics: Arc<PipelineMetrics>,
}

impl FilePipeline {
    /// Assemble a pipeline. `settings.embed_concurrency` of zero is treated as one.
    pub fn new(
        store: Arc<StatusStore>,
        adapters: Adapters,
        settings: PipelineSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let embed_permits = Arc::new(Semaphore::new(settings.embed_concurrency.max(1)));
        Self {
            store,
            adapters,
            settings,
            embed_permits,
            metrics,
        }
    }

    /// Status store the pipeline writes to.
    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    /// Adapters the pipeline calls.
    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    /// Run all three phases for one item.
    pub async fn process(
        &self,
        item: WorkItem,
        skip_duplicates: bool,
    ) -> Result<FileResult, StoreError> {
        let fetched = self.fetch(item).await;
        match self.admit(fetched, skip_duplicates)? {
            Admission::Done(result) => Ok(result),
            Admission::Run(claimed) => self.execute(claimed).await,
        }
    }

    /// Download and fingerprint the bytes behind `item`.
    pub async fn fetch(&self, item: WorkItem) -> Fetched {
        let locator = item.locator().to_string();
        let downloaded = match timeout(
            self.settings.stage_timeout,
            self.adapters.source.fetch(&locator),
        )
        .await
        {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => Err((FailureKind::Download, err.to_string())),
            Err(_) => Err((FailureKind::Timeout, self.timeout_message("download"))),
        };

        let bytes = match downloaded {
            Ok(bytes) => bytes,
            Err((kind, error)) => {
                tracing::warn!(locator = %locator, error = %error, "Download failed");
                return Fetched::Unavailable { item, kind, error };
            }
        };

        match fingerprint(bytes.as_slice()).await {
            Ok((content_hash, _)) => Fetched::Ready {
                item,
                bytes,
                content_hash,
            },
            Err(err) => Fetched::Unavailable {
                item,
                kind: FailureKind::Download,
                error: err.to_string(),
            },
        }
    }

    /// Register, deduplicate and claim. Never awaits.
    pub fn admit(&self, fetched: Fetched, skip_duplicates: bool) -> Result<Admission, StoreError> {
        let admission = match fetched {
            Fetched::Unavailable {
                item: WorkItem::Fresh { locator },
                kind,
                error,
            } => Admission::Done(FileResult {
                locator,
                outcome: FileOutcome::Failed {
                    file_id: None,
                    content_hash: None,
                    error_kind: kind,
                    error,
                },
            }),
            Fetched::Unavailable {
                item: WorkItem::Resume { record },
                kind,
                error,
            } => {
                let locator = record.source_path.clone();
                match self.claim_existing(&locator, &record.id)? {
                    Ok(record) => Admission::Done(self.fail(&locator, &record, kind, error)?),
                    Err(skipped) => Admission::Done(skipped),
                }
            }
            Fetched::Ready {
                item: WorkItem::Fresh { locator },
                bytes,
                content_hash,
            } => self.admit_fresh(locator, bytes, content_hash, skip_duplicates)?,
            Fetched::Ready {
                item: WorkItem::Resume { record },
                bytes,
                content_hash,
            } => {
                let locator = record.source_path.clone();
                match self.claim_existing(&locator, &record.id)? {
                    Err(skipped) => Admission::Done(skipped),
                    Ok(record) if record.content_hash != content_hash => {
                        let error = format!(
                            "content at {locator} changed: expected {}, found {}",
                            record.content_hash.short(),
                            content_hash.short()
                        );
                        Admission::Done(self.fail(
                            &locator,
                            &record,
                            FailureKind::ContentChanged,
                            error,
                        )?)
                    }
                    Ok(record) => Admission::Run(ClaimedFile {
                        locator,
                        record,
                        bytes,
                    }),
                }
            }
        };

        Ok(match admission {
            Admission::Done(result) => Admission::Done(self.settle(result)),
            run => run,
        })
    }

    fn admit_fresh(
        &self,
        locator: String,
        bytes: Vec<u8>,
        content_hash: ContentHash,
        skip_duplicates: bool,
    ) -> Result<Admission, StoreError> {
        let registration = self.store.register_if_absent(&NewFile {
            name: display_name(&locator),
            source_path: locator.clone(),
            content_hash: content_hash.clone(),
            size_bytes: bytes.len() as u64,
            file_type: file_type_of(&locator),
        })?;
        let existing = registration.record;

        if !registration.created {
            let resumable = existing.is_resumable(self.store.max_retries())
                && (existing.source_path == locator || !skip_duplicates);
            if !resumable {
                tracing::info!(
                    locator = %locator,
                    file_id = %existing.id,
                    content_hash = %existing.content_hash.short(),
                    status = %existing.status,
                    "Skipping duplicate content"
                );
                return Ok(Admission::Done(FileResult {
                    locator,
                    outcome: FileOutcome::Skipped {
                        file_id: existing.id,
                        content_hash: existing.content_hash,
                        reason: SkipReason::Duplicate,
                    },
                }));
            }
            tracing::info!(
                locator = %locator,
                file_id = %existing.id,
                status = %existing.status,
                retry_count = existing.retry_count,
                "Resuming tracked content"
            );
        }

        match self.claim_existing(&locator, &existing.id)? {
            Ok(record) => Ok(Admission::Run(ClaimedFile {
                locator,
                record,
                bytes,
            })),
            Err(skipped) => Ok(Admission::Done(skipped)),
        }
    }

    /// Move a stored record to `processing`, passing through the retry edge when it failed.
    ///
    /// Returns `Ok(Err(result))` with a skipped result when the record is no longer eligible.
    fn claim_existing(
        &self,
        locator: &str,
        id: &str,
    ) -> Result<Result<FileRecord, FileResult>, StoreError> {
        let current = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()));
        let current = match current {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(locator, file_id = id, error = %err, "Record vanished before claim");
                return Ok(Err(FileResult {
                    locator: locator.to_string(),
                    outcome: FileOutcome::Failed {
                        file_id: Some(id.to_string()),
                        content_hash: None,
                        error_kind: FailureKind::State,
                        error: err.to_string(),
                    },
                }));
            }
        };

        let not_eligible = |record: &FileRecord| FileResult {
            locator: locator.to_string(),
            outcome: FileOutcome::Skipped {
                file_id: record.id.clone(),
                content_hash: record.content_hash.clone(),
                reason: SkipReason::NotEligible,
            },
        };

        if !current.is_resumable(self.store.max_retries()) {
            return Ok(Err(not_eligible(&current)));
        }

        if current.status == FileStatus::Failed {
            match self
                .store
                .transition(&current.id, FileStatus::Pending, StatusUpdate::none())
            {
                Ok(_) => {}
                Err(StoreError::InvalidTransition { .. }) => return Ok(Err(not_eligible(&current))),
                Err(err) => return Err(err),
            }
        }

        match self
            .store
            .transition(&current.id, FileStatus::Processing, StatusUpdate::none())
        {
            Ok(record) => {
                tracing::debug!(locator, file_id = %record.id, "Claimed file");
                Ok(Ok(record))
            }
            Err(StoreError::InvalidTransition { .. }) => Ok(Err(not_eligible(&current))),
            Err(err) => Err(err),
        }
    }

    /// Upload, convert, embed, upsert and complete a claimed file.
    pub async fn execute(&self, claimed: ClaimedFile) -> Result<FileResult, StoreError> {
        let ClaimedFile {
            locator,
            record,
            bytes,
        } = claimed;

        let result = match self.run_stages(&record, &bytes).await {
            Ok(done) => {
                tracing::info!(
                    locator = %locator,
                    file_id = %record.id,
                    pages = done.pages,
                    "File completed"
                );
                FileResult {
                    locator,
                    outcome: FileOutcome::Success {
                        file_id: record.id.clone(),
                        content_hash: record.content_hash.clone(),
                        pages_processed: done.pages,
                        vector_ids: done.vector_ids,
                        object_url: Some(done.object_url),
                    },
                }
            }
            Err(StageError::Failed(kind, error)) => self.fail(&locator, &record, kind, error)?,
            Err(StageError::Store(err)) if err.is_unavailable() => return Err(err),
            Err(StageError::Store(err)) => {
                self.fail(&locator, &record, FailureKind::State, err.to_string())?
            }
        };
        Ok(self.settle(result))
    }

    async fn run_stages(&self, record: &FileRecord, bytes: &[u8]) -> Result<Completed, StageError> {
        let object_key = format!("{}/{}_{}", self.settings.object_prefix, record.id, record.name);
        let object_url = self
            .within(
                FailureKind::Upload,
                "upload",
                self.adapters.storage.put(bytes, &object_key),
            )
            .await?;
        self.store.transition(
            &record.id,
            FileStatus::Uploaded,
            StatusUpdate::object_url(object_url.clone()),
        )?;

        let pages = match timeout(
            self.settings.stage_timeout,
            self.adapters.converters.convert(&record.source_path, bytes),
        )
        .await
        {
            Ok(Ok(pages)) => pages,
            Ok(Err(err @ ConversionError::UnsupportedFileType(_))) => {
                return Err(StageError::Failed(
                    FailureKind::UnsupportedFileType,
                    err.to_string(),
                ));
            }
            Ok(Err(err)) => {
                return Err(StageError::Failed(FailureKind::Conversion, err.to_string()));
            }
            Err(_) => {
                return Err(StageError::Failed(
                    FailureKind::Timeout,
                    self.timeout_message("convert"),
                ));
            }
        };
        self.store
            .transition(&record.id, FileStatus::Converting, StatusUpdate::none())?;
        self.store
            .transition(&record.id, FileStatus::Embedding, StatusUpdate::none())?;

        let total_pages = pages.len() as u32;
        let embedded: Vec<(u32, PageEmbedding)> = stream::iter(pages)
            .map(|page| async move {
                let _permit = self
                    .embed_permits
                    .acquire()
                    .await
                    .map_err(|err| StageError::Failed(FailureKind::Embedding, err.to_string()))?;
                let embedding = self
                    .within(
                        FailureKind::Embedding,
                        "embed",
                        self.adapters.embedder.embed(&page),
                    )
                    .await
                    .map_err(|err| match err {
                        StageError::Failed(kind, message) => {
                            StageError::Failed(kind, format!("page {}: {message}", page.number))
                        }
                        other => other,
                    })?;
                Ok::<_, StageError>((page.number, embedding))
            })
            .buffered(self.settings.embed_concurrency.max(1))
            .try_collect()
            .await?;

        let indexed_at = now_rfc3339();
        let mut points = Vec::with_capacity(embedded.len());
        let mut new_embeddings = Vec::with_capacity(embedded.len());
        for (page_number, embedding) in embedded {
            let id = vector_reference(&record.id, page_number);
            let payload = build_payload(
                &PagePayload {
                    file_id: &record.id,
                    file_name: &record.name,
                    file_type: &record.file_type,
                    content_hash: &record.content_hash,
                    page_number,
                    total_pages,
                    token_count: embedding.token_count,
                    dimension: embedding.dimension,
                },
                &indexed_at,
            );
            new_embeddings.push(NewEmbedding {
                page_number,
                vector_reference: id.clone(),
                dimension: embedding.dimension,
                token_count: embedding.token_count,
            });
            points.push(VectorPoint {
                id,
                vector: embedding.vector,
                payload,
            });
        }

        self.within(
            FailureKind::VectorIndex,
            "upsert",
            self.adapters.index.upsert(points),
        )
        .await?;

        let (_, records) = self
            .store
            .complete_with_embeddings(&record.id, &new_embeddings)?;
        Ok(Completed {
            pages: total_pages,
            vector_ids: records
                .into_iter()
                .map(|embedding| embedding.vector_reference)
                .collect(),
            object_url,
        })
    }

    async fn within<T, E, F>(
        &self,
        kind: FailureKind,
        stage: &str,
        call: F,
    ) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        match timeout(self.settings.stage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StageError::Failed(kind, err.to_string())),
            Err(_) => Err(StageError::Failed(
                FailureKind::Timeout,
                self.timeout_message(stage),
            )),
        }
    }

    fn timeout_message(&self, stage: &str) -> String {
        format!(
            "{stage} timed out after {}s",
            self.settings.stage_timeout.as_secs_f32()
        )
    }

    /// Record `failed` for a claimed file and build the matching result.
    fn fail(
        &self,
        locator: &str,
        record: &FileRecord,
        kind: FailureKind,
        error: String,
    ) -> Result<FileResult, StoreError> {
        match self.store.transition(
            &record.id,
            FileStatus::Failed,
            StatusUpdate::failure(kind, error.clone()),
        ) {
            Ok(updated) => {
                tracing::warn!(
                    locator,
                    file_id = %record.id,
                    error_kind = %kind,
                    retry_count = updated.retry_count,
                    error = %error,
                    "File failed"
                );
            }
            Err(err @ StoreError::Database(_)) => return Err(err),
            Err(err) => {
                tracing::error!(
                    locator,
                    file_id = %record.id,
                    error = %err,
                    "Could not record failure"
                );
            }
        }
        Ok(FileResult {
            locator: locator.to_string(),
            outcome: FileOutcome::Failed {
                file_id: Some(record.id.clone()),
                content_hash: Some(record.content_hash.clone()),
                error_kind: kind,
                error,
            },
        })
    }

    fn settle(&self, result: FileResult) -> FileResult {
        match &result.outcome {
            FileOutcome::Success {
                pages_processed, ..
            } => self.metrics.record_success(u64::from(*pages_processed)),
            FileOutcome::Failed { .. } => self.metrics.record_failure(),
            FileOutcome::Skipped { .. } => self.metrics.record_skip(),
        }
        result
    }
}

fn display_name(locator: &str) -> String {
    Path::new(locator)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| locator.to_string())
}
