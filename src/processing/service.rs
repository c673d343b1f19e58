//! Ingestion service wiring the status store, the file pipeline and the batch orchestrator.

use crate::{
    config::{Config, EmbeddingProvider},
    convert::ConverterRegistry,
    embedding::{DeterministicEmbedder, EmbeddingService, HttpEmbeddingClient},
    hashing::ContentHash,
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        batch::BatchOrchestrator,
        pipeline::{Adapters, FilePipeline, PipelineSettings},
        types::{
            BatchOptions, BatchSummary, DeleteAck, FileResult, HealthSnapshot, IngestError,
            WorkItem,
        },
    },
    qdrant::QdrantService,
    source::{ListFilter, LocalFolderSource, SourceEntry},
    storage::object_storage_from_url,
    store::{EmbeddingRecord, FileRecord, Statistics, StatusStore},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Operations exposed to external surfaces (HTTP, CLI).
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Run one file through the pipeline.
    async fn process_file(
        &self,
        locator: String,
        skip_if_duplicate: bool,
    ) -> Result<FileResult, IngestError>;

    /// Run a batch over `locators` and, when requested, resumable records of earlier runs.
    async fn process_batch(
        &self,
        locators: Vec<String>,
        options: BatchOptions,
    ) -> Result<BatchSummary, IngestError>;

    /// Look up the record owning a content hash.
    async fn get_file_by_hash(&self, hash: &str) -> Result<FileRecord, IngestError>;

    /// Embedding records of a file ordered by page.
    async fn get_embeddings(&self, file_id: &str) -> Result<Vec<EmbeddingRecord>, IngestError>;

    /// Remove a file record, optionally together with its vectors.
    async fn delete_document(
        &self,
        file_id: &str,
        delete_vectors: bool,
    ) -> Result<DeleteAck, IngestError>;

    /// Aggregate counts over files, embeddings and batches.
    async fn get_statistics(&self) -> Result<Statistics, IngestError>;

    /// Probe the store and the vector index.
    async fn health(&self) -> HealthSnapshot;

    /// Runtime counters since startup.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Active configuration with secrets masked; `None` when built without one.
    fn config_snapshot(&self) -> Option<Config>;
}

/// Default [`IngestApi`] implementation.
///
/// A batch takes the run lock exclusively only while it resets orphaned in-flight records
/// and selects its work, then keeps a shared guard for the run. Single-file runs share the
/// lock, so they proceed next to a running batch but never across another batch's reset.
/// The lock is process-local. Two processes sharing one database must not run batches
/// concurrently.
pub struct IngestService {
    pipeline: Arc<FilePipeline>,
    orchestrator: BatchOrchestrator,
    metrics: Arc<PipelineMetrics>,
    run_lock: RwLock<()>,
    config: Option<Config>,
}

impl IngestService {
    /// Build every adapter from `config`, open the store and bootstrap the collection.
    pub async fn from_config(config: &Config) -> Result<Self, IngestError> {
        let store = Arc::new(StatusStore::open(&config.database_path, config.max_retries)?);
        tracing::info!(path = %config.database_path.display(), "Status store opened");

        let index = Arc::new(QdrantService::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.qdrant_collection_name.clone(),
        )?);
        index
            .ensure_collection(config.embedding_dimension as u64)
            .await?;
        tracing::info!(collection = %index.collection(), "Vector collection ready");

        let embedder: Arc<dyn EmbeddingService> = match config.embedding_provider {
            EmbeddingProvider::Deterministic => {
                Arc::new(DeterministicEmbedder::new(config.embedding_dimension))
            }
            EmbeddingProvider::Http => {
                let endpoint = config.embedding_url.clone().ok_or_else(|| {
                    IngestError::InvalidRequest("EMBEDDING_URL is required".to_string())
                })?;
                Arc::new(HttpEmbeddingClient::new(
                    endpoint,
                    config.embedding_model.clone(),
                    Some(config.embedding_dimension),
                    config.stage_timeout(),
                )?)
            }
        };

        let adapters = Adapters {
            source: Arc::new(LocalFolderSource::new(&config.source_root)),
            storage: object_storage_from_url(
                &config.object_store_url,
                config.object_store_sas_token.clone(),
            )?,
            converters: Arc::new(ConverterRegistry::with_defaults(config.pdf_render_width)),
            embedder,
            index: index.clone(),
        };
        let settings = PipelineSettings {
            object_prefix: config.object_prefix.clone(),
            stage_timeout: config.stage_timeout(),
            embed_concurrency: config.embed_concurrency,
        };

        Ok(Self::new(store, adapters, settings, config.batch_concurrency).with_config(config))
    }

    /// Report `config` (redacted) through [`IngestApi::config_snapshot`].
    pub fn with_config(mut self, config: &Config) -> Self {
        self.config = Some(config.redacted());
        self
    }

    /// Assemble a service from already-built parts.
    pub fn new(
        store: Arc<StatusStore>,
        adapters: Adapters,
        settings: PipelineSettings,
        batch_concurrency: usize,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let pipeline = Arc::new(FilePipeline::new(
            store,
            adapters,
            settings,
            metrics.clone(),
        ));
        let orchestrator =
            BatchOrchestrator::new(pipeline.clone(), batch_concurrency, metrics.clone());
        Self {
            pipeline,
            orchestrator,
            metrics,
            run_lock: RwLock::new(()),
            config: None,
        }
    }

    /// Enumerate documents below `folder` through the configured source.
    pub async fn list_documents(
        &self,
        folder: &str,
        filter: &ListFilter,
    ) -> Result<Vec<SourceEntry>, IngestError> {
        Ok(self.pipeline.adapters().source.list(folder, filter).await?)
    }

    fn store(&self) -> &StatusStore {
        self.pipeline.store()
    }
}

#[async_trait]
impl IngestApi for IngestService {
    async fn process_file(
        &self,
        locator: String,
        skip_if_duplicate: bool,
    ) -> Result<FileResult, IngestError> {
        if locator.trim().is_empty() {
            return Err(IngestError::InvalidRequest("locator is empty".to_string()));
        }
        let _guard = self.run_lock.read().await;
        tracing::info!(locator = %locator, skip_if_duplicate, "Processing file");
        Ok(self
            .pipeline
            .process(WorkItem::Fresh { locator }, skip_if_duplicate)
            .await?)
    }

    async fn process_batch(
        &self,
        locators: Vec<String>,
        options: BatchOptions,
    ) -> Result<BatchSummary, IngestError> {
        // Exclusive only while orphans are reclaimed; single files may run alongside the batch.
        let exclusive = self.run_lock.write().await;
        let work = self.orchestrator.select_work(locators, options)?;
        let _shared = exclusive.downgrade();
        Ok(self.orchestrator.run_work_set(work, options).await?)
    }

    async fn get_file_by_hash(&self, hash: &str) -> Result<FileRecord, IngestError> {
        let hash = ContentHash::parse(&hash.to_ascii_lowercase())
            .ok_or_else(|| IngestError::InvalidRequest(format!("not a SHA-256 digest: {hash}")))?;
        self.store()
            .get_by_hash(&hash)?
            .ok_or_else(|| IngestError::NotFound(format!("no file with content hash {hash}")))
    }

    async fn get_embeddings(&self, file_id: &str) -> Result<Vec<EmbeddingRecord>, IngestError> {
        if self.store().get(file_id)?.is_none() {
            return Err(IngestError::NotFound(format!("file {file_id}")));
        }
        Ok(self.store().embeddings_for_file(file_id)?)
    }

    async fn delete_document(
        &self,
        file_id: &str,
        delete_vectors: bool,
    ) -> Result<DeleteAck, IngestError> {
        if self.store().get(file_id)?.is_none() {
            return Err(IngestError::NotFound(format!("file {file_id}")));
        }
        let embeddings_removed = self.store().embeddings_for_file(file_id)?.len();

        // Vectors go first so a failed index call leaves the record to retry the delete.
        if delete_vectors {
            self.pipeline
                .adapters()
                .index
                .delete_by_payload_field("file_id", file_id)
                .await?;
        }
        if !self.store().delete_file(file_id)? {
            return Err(IngestError::NotFound(format!("file {file_id}")));
        }
        tracing::info!(file_id, delete_vectors, embeddings_removed, "Document deleted");
        Ok(DeleteAck {
            file_id: file_id.to_string(),
            vectors_deleted: delete_vectors,
            embeddings_removed,
        })
    }

    async fn get_statistics(&self) -> Result<Statistics, IngestError> {
        Ok(self.store().statistics()?)
    }

    async fn health(&self) -> HealthSnapshot {
        let mut errors = Vec::new();
        let store_ok = match self.store().statistics() {
            Ok(_) => true,
            Err(err) => {
                errors.push(err.to_string());
                false
            }
        };
        let indexed_points = match self.pipeline.adapters().index.collection_info().await {
            Ok(info) => Some(info.count),
            Err(err) => {
                tracing::warn!(error = %err, "Vector index health probe failed");
                errors.push(err.to_string());
                None
            }
        };
        HealthSnapshot {
            store_ok,
            index_reachable: indexed_points.is_some(),
            indexed_points,
            errors,
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn config_snapshot(&self) -> Option<Config> {
        self.config.clone()
    }
}
