//! HTTP client wrapper for interacting with Qdrant.

use crate::error::AdapterError;
use crate::qdrant::types::{CollectionInfo, CollectionResponse, QdrantError, VectorIndex, VectorPoint};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Payload fields that get a keyword index on collection bootstrap.
const INDEXED_FIELDS: [&str; 2] = ["file_id", "content_hash"];

/// Lightweight HTTP client for one Qdrant collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantService {
    /// Construct a client for `collection` on the Qdrant instance at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("pageledger/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        let collection = collection.into();
        tracing::debug!(
            url = %base_url,
            collection = %collection,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection,
        })
    }

    /// Name of the collection this client writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection when missing and make sure the filter fields are indexed.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        self.create_collection_if_not_exists(vector_size).await?;
        self.ensure_payload_indexes().await
    }

    /// Create the collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(&self, vector_size: u64) -> Result<(), QdrantError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::info!(
            collection = %self.collection,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    /// Ensure keyword payload indexes exist for the fields used in deletes and lookups.
    pub async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        for field in INDEXED_FIELDS {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });

            let response = self
                .request(Method::PUT, &format!("collections/{}/index", self.collection))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = %self.collection, field, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, "Payload index already exists");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    /// Write points and wait until Qdrant has applied them.
    pub async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let serialized: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                points = point_count,
                "Points upserted"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Delete every point whose payload `key` matches `value`.
    pub async fn delete_points_matching(&self, key: &str, value: &str) -> Result<(), QdrantError> {
        let body = json!({
            "filter": {
                "must": [
                    {
                        "key": key,
                        "match": { "value": value }
                    }
                ]
            }
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, key, value, "Points deleted");
        })
        .await
    }

    /// Point count and vector configuration of the collection.
    pub async fn describe_collection(&self) -> Result<CollectionInfo, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Failed to describe collection");
            return Err(error);
        }

        let CollectionResponse { result } = response
            .json()
            .await
            .map_err(|err| QdrantError::Malformed(err.to_string()))?;
        let vectors = result.config.and_then(|config| config.params.vectors);
        let (dimension, distance_metric) = match vectors {
            Some(Value::Object(params)) => (
                params.get("size").and_then(Value::as_u64),
                params
                    .get("distance")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            _ => (None, None),
        };

        Ok(CollectionInfo {
            count: result.points_count.unwrap_or(0),
            dimension,
            distance_metric,
        })
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantService {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), AdapterError> {
        self.upsert_points(points).await?;
        Ok(())
    }

    async fn delete_by_payload_field(&self, key: &str, value: &str) -> Result<(), AdapterError> {
        Ok(self.delete_points_matching(key, value).await?)
    }

    async fn collection_info(&self) -> Result<CollectionInfo, AdapterError> {
        Ok(self.describe_collection().await?)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
    use serde_json::Map;

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), Some("secret".into()), "pages").expect("client")
    }

    #[tokio::test]
    async fn upsert_waits_and_sends_payloads() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/pages/points")
                    .query_param("wait", "true")
                    .header("api-key", "secret")
                    .json_body(json!({
                        "points": [
                            {
                                "id": "7b0c4c8e-0000-5000-8000-000000000001",
                                "vector": [0.5, 0.5],
                                "payload": { "file_id": "f1", "page_number": 1 }
                            }
                        ]
                    }));
                then.status(200)
                    .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
            })
            .await;

        let mut payload = Map::new();
        payload.insert("file_id".into(), json!("f1"));
        payload.insert("page_number".into(), json!(1));
        let written = service(&server)
            .upsert_points(vec![VectorPoint {
                id: "7b0c4c8e-0000-5000-8000-000000000001".into(),
                vector: vec![0.5, 0.5],
                payload,
            }])
            .await
            .expect("upsert");

        mock.assert_async().await;
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn delete_filters_on_payload_field() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/pages/points/delete")
                    .json_body(json!({
                        "filter": { "must": [ { "key": "file_id", "match": { "value": "f1" } } ] }
                    }));
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        service(&server)
            .delete_by_payload_field("file_id", "f1")
            .await
            .expect("delete");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn collection_info_reads_count_and_vector_params() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/pages");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": {
                        "points_count": 42,
                        "config": { "params": { "vectors": { "size": 128, "distance": "Cosine" } } }
                    }
                }));
            })
            .await;

        let info = service(&server).collection_info().await.expect("info");
        assert_eq!(
            info,
            CollectionInfo {
                count: 42,
                dimension: Some(128),
                distance_metric: Some("Cosine".into()),
            }
        );
    }

    #[tokio::test]
    async fn bootstrap_creates_missing_collection_and_indexes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/pages");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/pages")
                    .json_body(json!({ "vectors": { "size": 64, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let index = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/pages/index");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        service(&server).ensure_collection(64).await.expect("bootstrap");
        create.assert_async().await;
        index.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn rejected_upsert_maps_to_adapter_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/pages/points");
                then.status(400).body("wrong vector size");
            })
            .await;

        let err = service(&server)
            .upsert(vec![VectorPoint {
                id: "p".into(),
                vector: vec![1.0],
                payload: Map::new(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::UnexpectedStatus { status, ref body }
                if status == StatusCode::BAD_REQUEST && body == "wrong vector size"
        ));
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            format_endpoint("http://localhost:6333/", "/collections/x"),
            "http://localhost:6333/collections/x"
        );
        assert!(QdrantService::new("not a url", None, "x").is_err());
    }
}
