use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
use pageledger::config::{self, Config};
use pageledger::processing::{BatchOptions, FileOutcome, IngestApi, IngestService};
use pageledger::source::ListFilter;
use pageledger::store::{BatchStatus, FailureKind, FileStatus};
use serde_json::json;

fn write_png(path: &Path, shade: u8) {
    let image = image::RgbImage::from_pixel(6, 4, image::Rgb([shade, 40, 200]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, bytes).expect("write png");
}

fn config_for(root: &Path, qdrant_url: &str) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_PATH", root.join("ledger.db").display().to_string()),
        ("SOURCE_ROOT", root.join("source").display().to_string()),
        (
            "OBJECT_STORE_URL",
            format!("file://{}", root.join("objects").display()),
        ),
        ("OBJECT_PREFIX", "/archive/".to_string()),
        ("QDRANT_URL", qdrant_url.to_string()),
        ("QDRANT_COLLECTION_NAME", "pages".to_string()),
        ("QDRANT_API_KEY", "local-dev-key".to_string()),
        ("EMBEDDING_PROVIDER", "deterministic".to_string()),
        ("EMBEDDING_DIMENSION", "16".to_string()),
        ("BATCH_CONCURRENCY", "2".to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).expect("valid config")
}

#[tokio::test]
async fn folder_ingest_archives_indexes_and_deletes() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_png(&dir.path().join("source/scans/receipt.png"), 10);
    write_png(&dir.path().join("source/scans/nested/invoice.png"), 90);
    std::fs::write(dir.path().join("source/scans/readme.docx"), b"PK\x03\x04").expect("docx");

    let server = MockServer::start_async().await;
    let describe = server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/pages");
            then.status(200).json_body(json!({
                "result": {
                    "points_count": 2,
                    "config": { "params": { "vectors": { "size": 16, "distance": "Cosine" } } }
                },
                "status": "ok"
            }));
        })
        .await;
    let payload_index = server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/pages/index");
            then.status(200).json_body(json!({ "result": { "status": "acknowledged" } }));
        })
        .await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/pages/points")
                .query_param("wait", "true")
                .body_contains("\"page_number\":1")
                .body_contains("\"file_type\":\".png\"");
            then.status(200).json_body(json!({ "result": { "status": "completed" } }));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/collections/pages/points/delete")
                .query_param("wait", "true")
                .body_contains("\"key\":\"file_id\"");
            then.status(200).json_body(json!({ "result": { "status": "completed" } }));
        })
        .await;

    let config = config_for(dir.path(), &server.base_url());
    let service = IngestService::from_config(&config)
        .await
        .expect("service initializes");
    assert_eq!(payload_index.hits_async().await, 2);

    let entries = service
        .list_documents("scans", &ListFilter::default())
        .await
        .expect("listing");
    let locators: Vec<String> = entries.into_iter().map(|entry| entry.locator).collect();
    assert_eq!(
        locators,
        vec![
            "scans/nested/invoice.png".to_string(),
            "scans/readme.docx".to_string(),
            "scans/receipt.png".to_string(),
        ]
    );

    let summary = service
        .process_batch(locators, BatchOptions::default())
        .await
        .expect("batch runs");
    assert_eq!(
        (summary.successful, summary.failed, summary.skipped),
        (2, 1, 0)
    );
    assert_eq!(summary.status, BatchStatus::Partial);
    assert_eq!(upsert.hits_async().await, 2);
    assert!(matches!(
        summary.results[1].outcome,
        FileOutcome::Failed {
            error_kind: FailureKind::UnsupportedFileType,
            ..
        }
    ));

    let receipt = &summary.results[2];
    let FileOutcome::Success {
        file_id,
        pages_processed,
        object_url,
        ..
    } = &receipt.outcome
    else {
        panic!("receipt should have been ingested");
    };
    assert_eq!(*pages_processed, 1);
    let archived = dir
        .path()
        .join("objects/archive")
        .join(format!("{file_id}_receipt.png"));
    assert!(archived.exists());
    assert_eq!(
        object_url.as_deref(),
        Some(format!("file://{}", archived.display()).as_str())
    );

    let embeddings = service.get_embeddings(file_id).await.expect("embeddings");
    assert_eq!(embeddings.len(), 1);
    assert_eq!(embeddings[0].dimension, 16);

    let shown = service.config_snapshot().expect("configured service");
    assert_eq!(shown.qdrant_api_key.as_deref(), Some(config::REDACTED));
    assert_eq!(shown.object_prefix, "archive");

    let health = service.health().await;
    assert!(health.is_healthy());
    assert_eq!(health.indexed_points, Some(2));
    assert!(describe.hits_async().await >= 2);

    let ack = service
        .delete_document(file_id, true)
        .await
        .expect("delete succeeds");
    assert!(ack.vectors_deleted);
    assert_eq!(delete.hits_async().await, 1);

    let stats = service.get_statistics().await.expect("statistics");
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.files[&FileStatus::Completed].count, 1);
    assert_eq!(stats.files[&FileStatus::Failed].count, 1);
}

#[tokio::test]
async fn unreachable_index_fails_initialization() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/pages");
            then.status(500).body("boom");
        })
        .await;

    let config = config_for(dir.path(), &server.base_url());
    assert!(IngestService::from_config(&config).await.is_err());
}
