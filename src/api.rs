//! HTTP surface for the ingestion engine.
//!
//! A compact Axum router over any [`IngestApi`]:
//!
//! - `GET /health` – Probe the status store and the vector index (`503` when either is down).
//! - `POST /process/file` – Run one file through the pipeline. File-level failures are reported
//!   in the body with `"status": "failed"`, not as an HTTP error.
//! - `POST /process/batch` – Run a batch over a list of locators, optionally resuming earlier work.
//! - `GET /documents/:hash` – Look up the file record owning a content hash.
//! - `GET /files/:file_id/embeddings` – Embedding records of a file in page order.
//! - `DELETE /files/:file_id?delete_vectors=true` – Remove a file record and optionally its vectors.
//! - `GET /statistics` – Files by status, embeddings total, batch totals.
//! - `GET /metrics` – Runtime counters since startup.
//! - `GET /config` – Active configuration with secrets masked.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::processing::{BatchOptions, IngestApi, IngestError};
use crate::store::StoreError;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: IngestApi + 'static,
{
    Router::new()
        .route("/health", get(health::<S>))
        .route("/process/file", post(process_file::<S>))
        .route("/process/batch", post(process_batch::<S>))
        .route("/documents/:hash", get(get_document::<S>))
        .route("/files/:file_id", delete(delete_document::<S>))
        .route("/files/:file_id/embeddings", get(get_embeddings::<S>))
        .route("/statistics", get(get_statistics::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/config", get(get_config::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

fn default_true() -> bool {
    true
}

/// Request body for `POST /process/file`.
#[derive(Deserialize)]
struct ProcessFileRequest {
    /// Source locator of the file.
    locator: String,
    /// Skip the file when its content is tracked under another locator.
    #[serde(default = "default_true")]
    skip_if_duplicate: bool,
}

/// Request body for `POST /process/batch`.
#[derive(Deserialize)]
struct ProcessBatchRequest {
    /// Source locators; may be empty to only resume earlier work.
    #[serde(default)]
    files: Vec<String>,
    #[serde(flatten)]
    options: BatchOptions,
}

/// Query string of `DELETE /files/:file_id`.
#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    delete_vectors: bool,
}

async fn health<S>(State(service): State<Arc<S>>) -> Response
where
    S: IngestApi,
{
    let snapshot = service.health().await;
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot)).into_response()
}

/// Process one file and return its tagged result.
async fn process_file<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ProcessFileRequest>,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let result = service
        .process_file(request.locator, request.skip_if_duplicate)
        .await?;
    Ok(Json(result).into_response())
}

/// Run a batch and return its summary.
async fn process_batch<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ProcessBatchRequest>,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let summary = service.process_batch(request.files, request.options).await?;
    tracing::info!(
        batch_id = %summary.batch_id,
        successful = summary.successful,
        failed = summary.failed,
        skipped = summary.skipped,
        "Batch request completed"
    );
    Ok(Json(summary).into_response())
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(hash): Path<String>,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let record = service.get_file_by_hash(&hash).await?;
    Ok(Json(record).into_response())
}

async fn get_embeddings<S>(
    State(service): State<Arc<S>>,
    Path(file_id): Path<String>,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let embeddings = service.get_embeddings(&file_id).await?;
    Ok(Json(json!({ "file_id": file_id, "embeddings": embeddings })).into_response())
}

async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Path(file_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let ack = service
        .delete_document(&file_id, query.delete_vectors)
        .await?;
    Ok(Json(ack).into_response())
}

async fn get_statistics<S>(State(service): State<Arc<S>>) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let statistics = service.get_statistics().await?;
    Ok(Json(statistics).into_response())
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Response
where
    S: IngestApi,
{
    Json(service.metrics_snapshot()).into_response()
}

async fn get_config<S>(State(service): State<Arc<S>>) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let config = service
        .config_snapshot()
        .ok_or_else(|| IngestError::NotFound("no configuration loaded".to_string()))?;
    Ok(Json(config).into_response())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "process_file",
                method: "POST",
                path: "/process/file",
                description: "Download, fingerprint, archive, convert to pages, embed, and index one file. Returns { \"status\": \"success\" | \"failed\" | \"skipped\", ... }.",
                request_example: Some(json!({
                    "locator": "reports/annual-report.pdf",
                    "skip_if_duplicate": true
                })),
            },
            CommandDescriptor {
                name: "process_batch",
                method: "POST",
                path: "/process/batch",
                description: "Run a batch over the listed files; with resume enabled, pending and retryable failed files from earlier runs are picked up too.",
                request_example: Some(json!({
                    "files": ["reports/a.pdf", "scans/b.png"],
                    "skip_duplicates": true,
                    "resume": true
                })),
            },
            CommandDescriptor {
                name: "get_document",
                method: "GET",
                path: "/documents/:hash",
                description: "Return the file record owning a SHA-256 content hash.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_embeddings",
                method: "GET",
                path: "/files/:file_id/embeddings",
                description: "Return the per-page embedding records of a file.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_document",
                method: "DELETE",
                path: "/files/:file_id?delete_vectors=true",
                description: "Delete a file record and its embedding records; optionally remove its vectors from the index.",
                request_example: None,
            },
            CommandDescriptor {
                name: "statistics",
                method: "GET",
                path: "/statistics",
                description: "Files grouped by status with sizes, embeddings total, and batch totals.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
            CommandDescriptor {
                name: "config",
                method: "GET",
                path: "/config",
                description: "Return the active configuration; API keys and SAS tokens are masked.",
                request_example: None,
            },
        ],
    })
}

struct AppError(IngestError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IngestError::NotFound(_) | IngestError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            IngestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::Adapter(_) => StatusCode::BAD_GATEWAY,
            IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(inner: IngestError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::config::{Config, REDACTED};
    use crate::hashing::fingerprint_bytes;
    use crate::metrics::MetricsSnapshot;
    use crate::processing::{
        BatchOptions, BatchSummary, DeleteAck, FileOutcome, FileResult, HealthSnapshot, IngestApi,
        IngestError,
    };
    use crate::store::{BatchStatus, EmbeddingRecord, FileRecord, Statistics, StoreError};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_processing_endpoints() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let process = commands
            .iter()
            .find(|cmd| cmd.name == "process_file")
            .expect("process_file command present");

        assert_eq!(process.method, "POST");
        assert_eq!(process.path, "/process/file");
        assert!(commands.iter().any(|cmd| cmd.method == "DELETE"));
    }

    #[tokio::test]
    async fn failed_file_is_reported_with_ok_status() {
        let service = Arc::new(StubIngestService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process/file")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "locator": "missing.pdf" }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "failed");
        assert_eq!(json["locator"], "missing.pdf");
        assert_eq!(json["error_kind"], "download");

        let calls = service.calls.lock().await.clone();
        assert_eq!(calls, vec!["process_file missing.pdf true".to_string()]);
    }

    #[tokio::test]
    async fn batch_request_forwards_options() {
        let service = Arc::new(StubIngestService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "files": ["a.pdf", "b.pdf"], "skip_duplicates": false }).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_files"], 2);
        assert_eq!(json["status"], "completed");

        let calls = service.calls.lock().await.clone();
        assert_eq!(calls, vec!["process_batch 2 false false".to_string()]);
    }

    #[tokio::test]
    async fn unknown_hash_maps_to_not_found() {
        let app = create_router(Arc::new(StubIngestService::default()));
        let hash = fingerprint_bytes(b"absent");
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/documents/{hash}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("content hash"));
    }

    #[tokio::test]
    async fn store_failure_maps_to_server_error() {
        let app = create_router(Arc::new(StubIngestService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/statistics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn delete_reads_vector_flag_from_query() {
        let service = Arc::new(StubIngestService::default());
        let app = create_router(service.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/files/file-1?delete_vectors=true")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["vectors_deleted"], true);
        assert_eq!(
            service.calls.lock().await.clone(),
            vec!["delete_document file-1 true".to_string()]
        );
    }

    #[tokio::test]
    async fn unhealthy_index_returns_service_unavailable() {
        let app = create_router(Arc::new(StubIngestService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["store_ok"], true);
        assert_eq!(json["index_reachable"], false);
    }

    #[tokio::test]
    async fn config_route_returns_masked_configuration() {
        let app = create_router(Arc::new(StubIngestService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/config")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["qdrant_url"], "http://qdrant:6333");
        assert_eq!(json["qdrant_api_key"], REDACTED);
        assert_eq!(json["object_store_sas_token"], REDACTED);
        assert_eq!(json["max_retries"], 3);
        assert!(!json.to_string().contains("top-secret"));
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[derive(Default)]
    struct StubIngestService {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IngestApi for StubIngestService {
        async fn process_file(
            &self,
            locator: String,
            skip_if_duplicate: bool,
        ) -> Result<FileResult, IngestError> {
            self.calls
                .lock()
                .await
                .push(format!("process_file {locator} {skip_if_duplicate}"));
            Ok(FileResult {
                locator,
                outcome: FileOutcome::Failed {
                    file_id: None,
                    content_hash: None,
                    error_kind: crate::store::FailureKind::Download,
                    error: "not found".into(),
                },
            })
        }

        async fn process_batch(
            &self,
            locators: Vec<String>,
            options: BatchOptions,
        ) -> Result<BatchSummary, IngestError> {
            self.calls.lock().await.push(format!(
                "process_batch {} {} {}",
                locators.len(),
                options.skip_duplicates,
                options.resume
            ));
            Ok(BatchSummary {
                batch_id: "batch-1".into(),
                total_files: locators.len() as u32,
                successful: locators.len() as u32,
                failed: 0,
                skipped: 0,
                resumed: 0,
                status: BatchStatus::Completed,
                results: Vec::new(),
            })
        }

        async fn get_file_by_hash(&self, hash: &str) -> Result<FileRecord, IngestError> {
            Err(IngestError::NotFound(format!("no file with content hash {hash}")))
        }

        async fn get_embeddings(
            &self,
            _file_id: &str,
        ) -> Result<Vec<EmbeddingRecord>, IngestError> {
            Ok(Vec::new())
        }

        async fn delete_document(
            &self,
            file_id: &str,
            delete_vectors: bool,
        ) -> Result<DeleteAck, IngestError> {
            self.calls
                .lock()
                .await
                .push(format!("delete_document {file_id} {delete_vectors}"));
            Ok(DeleteAck {
                file_id: file_id.to_string(),
                vectors_deleted: delete_vectors,
                embeddings_removed: 0,
            })
        }

        async fn get_statistics(&self) -> Result<Statistics, IngestError> {
            Err(IngestError::Store(StoreError::BatchClosed("stub".into())))
        }

        async fn health(&self) -> HealthSnapshot {
            HealthSnapshot {
                store_ok: true,
                index_reachable: false,
                indexed_points: None,
                errors: vec!["connection refused".into()],
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }

        fn config_snapshot(&self) -> Option<Config> {
            let config = Config::from_lookup(|key| match key {
                "QDRANT_URL" => Some("http://qdrant:6333".to_string()),
                "QDRANT_API_KEY" => Some("top-secret".to_string()),
                "OBJECT_STORE_SAS_TOKEN" => Some("top-secret".to_string()),
                _ => None,
            })
            .expect("stub config");
            Some(config.redacted())
        }
    }
}
