use crate::convert::Page;
use crate::error::AdapterError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

/// Vector produced for one page image.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEmbedding {
    /// Embedding values.
    pub vector: Vec<f32>,
    /// Length of `vector`.
    pub dimension: u32,
    /// Tokens or patches the model consumed for this page.
    pub token_count: u32,
}

impl PageEmbedding {
    fn from_vector(vector: Vec<f32>, token_count: u32) -> Self {
        Self {
            dimension: vector.len() as u32,
            vector,
            token_count,
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Produce an embedding for a single page image.
    async fn embed(&self, page: &Page) -> Result<PageEmbedding, AdapterError>;
}

/// Offline embedder that hashes PNG bytes into a normalized vector of fixed length.
///
/// Identical pages always yield identical vectors, which keeps local runs and tests
/// reproducible without a model server.
pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    /// Construct an embedder producing vectors of `dimension` values.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(bytes: &[u8], dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if bytes.is_empty() {
            return embedding;
        }

        for (idx, byte) in bytes.iter().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(*byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingService for DeterministicEmbedder {
    async fn embed(&self, page: &Page) -> Result<PageEmbedding, AdapterError> {
        if self.dimension == 0 {
            return Err(AdapterError::InvalidInput(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if page.png.is_empty() {
            return Err(AdapterError::InvalidInput(format!(
                "page {} has no image data",
                page.number
            )));
        }

        tracing::trace!(page = page.number, dimension = self.dimension, "Hashing page");
        let vector = Self::encode(&page.png, self.dimension);
        let token_count = page.png.len().div_ceil(self.dimension) as u32;
        Ok(PageEmbedding::from_vector(vector, token_count))
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    token_count: Option<u32>,
}

/// Client for an HTTP embedding endpoint accepting raw PNG pages.
///
/// The endpoint may answer with a single `embedding` or with a multi-vector `embeddings`
/// list (one vector per image patch); the latter is mean-pooled into one vector.
pub struct HttpEmbeddingClient {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) model: Option<String>,
    pub(crate) expected_dimension: Option<usize>,
}

impl HttpEmbeddingClient {
    /// Client posting to `endpoint`; `expected_dimension` rejects vectors of other sizes.
    pub fn new(
        endpoint: impl Into<String>,
        model: Option<String>,
        expected_dimension: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent("pageledger/0.1")
            .timeout(timeout)
            .build()?;
        let endpoint = endpoint.into();
        tracing::debug!(endpoint = %endpoint, model = ?model, "Initialized embedding client");
        Ok(Self {
            client,
            endpoint,
            model,
            expected_dimension,
        })
    }

    fn pool(response: EmbedResponse) -> Result<PageEmbedding, AdapterError> {
        if let Some(vector) = response.embedding {
            let token_count = response.token_count.unwrap_or(1);
            return Ok(PageEmbedding::from_vector(vector, token_count));
        }

        let vectors = response
            .embeddings
            .filter(|vectors| !vectors.is_empty())
            .ok_or_else(|| {
                AdapterError::InvalidResponse("response carries no embedding".to_string())
            })?;
        let dimension = vectors[0].len();
        if vectors.iter().any(|vector| vector.len() != dimension) {
            return Err(AdapterError::InvalidResponse(
                "multi-vector embedding has ragged rows".to_string(),
            ));
        }

        let mut pooled = vec![0.0_f32; dimension];
        for vector in &vectors {
            for (slot, value) in pooled.iter_mut().zip(vector) {
                *slot += value;
            }
        }
        let count = vectors.len() as f32;
        for value in &mut pooled {
            *value /= count;
        }

        let token_count = response.token_count.unwrap_or(vectors.len() as u32);
        Ok(PageEmbedding::from_vector(pooled, token_count))
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingClient {
    async fn embed(&self, page: &Page) -> Result<PageEmbedding, AdapterError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/png")
            .query(&[("page", page.number), ("width", page.width), ("height", page.height)]);
        if let Some(model) = &self.model {
            request = request.query(&[("model", model)]);
        }

        let response = request.body(page.png.clone()).send().await?;
        if !response.status().is_success() {
            let error = AdapterError::from_response(response).await;
            tracing::error!(page = page.number, error = %error, "Embedding request failed");
            return Err(error);
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;
        let embedding = Self::pool(body)?;

        if embedding.vector.is_empty() {
            return Err(AdapterError::InvalidResponse(
                "embedding vector is empty".to_string(),
            ));
        }
        if let Some(expected) = self.expected_dimension
            && embedding.vector.len() != expected
        {
            return Err(AdapterError::InvalidResponse(format!(
                "expected {expected}-dimensional embedding, got {}",
                embedding.vector.len()
            )));
        }

        tracing::debug!(
            page = page.number,
            dimension = embedding.dimension,
            tokens = embedding.token_count,
            "Page embedded"
        );
        Ok(embedding)
    }
}
