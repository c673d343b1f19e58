//! Object storage for archiving original document bytes.
//!
//! Two backends share the [`ObjectStorage`] trait: a local directory and an HTTP blob
//! container (Azure-style `PUT` with `x-ms-blob-type`, optional SAS query). Which one is
//! used is decided by the scheme of the configured URL.

use crate::error::AdapterError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write-once archive of document bytes, addressed by object name.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous object, and return its URL.
    async fn put(&self, bytes: &[u8], name: &str) -> Result<String, AdapterError>;

    /// Whether an object named `name` exists.
    async fn exists(&self, name: &str) -> Result<bool, AdapterError>;

    /// Load the object named `name`.
    async fn get(&self, name: &str) -> Result<Vec<u8>, AdapterError>;
}

/// Pick a backend from `url`: `file://` selects [`FsObjectStore`], `http(s)://` selects
/// [`BlobContainerStore`].
pub fn object_storage_from_url(
    url: &str,
    sas_token: Option<String>,
) -> Result<Arc<dyn ObjectStorage>, AdapterError> {
    if let Some(path) = url.strip_prefix("file://") {
        if path.is_empty() {
            return Err(AdapterError::InvalidInput(
                "file:// object store URL needs a directory".to_string(),
            ));
        }
        return Ok(Arc::new(FsObjectStore::new(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Arc::new(BlobContainerStore::new(url, sas_token)?));
    }
    Err(AdapterError::InvalidInput(format!(
        "unsupported object store URL: {url}"
    )))
}

fn validate_name(name: &str) -> Result<(), AdapterError> {
    let path = Path::new(name);
    let valid = !name.trim().is_empty()
        && !path.is_absolute()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(AdapterError::InvalidInput(format!(
            "invalid object name: {name}"
        )))
    }
}

/// Objects stored as files below a root directory.
///
/// Writes land in a temporary sibling first and are renamed into place, so readers never
/// observe a partially written object.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Store rooted at `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, AdapterError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStore {
    async fn put(&self, bytes: &[u8], name: &str) -> Result<String, AdapterError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_file_name(format!(
            ".{}.tmp-{}",
            path.file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4().simple()
        ));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        tracing::debug!(object = name, size = bytes.len(), "Object stored on disk");
        Ok(format!("file://{}", path.display()))
    }

    async fn exists(&self, name: &str) -> Result<bool, AdapterError> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, AdapterError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AdapterError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Objects stored as block blobs in an HTTP container.
pub struct BlobContainerStore {
    pub(crate) client: Client,
    pub(crate) container: Url,
    pub(crate) sas_token: Option<String>,
}

impl BlobContainerStore {
    /// Store writing to the container at `container_url`, authorizing with an optional SAS
    /// query string (with or without the leading `?`).
    pub fn new(container_url: &str, sas_token: Option<String>) -> Result<Self, AdapterError> {
        let container = Url::parse(container_url)
            .map_err(|err| AdapterError::InvalidInput(format!("{container_url}: {err}")))?;
        if container.cannot_be_a_base() {
            return Err(AdapterError::InvalidInput(format!(
                "container URL cannot hold object paths: {container_url}"
            )));
        }
        let client = Client::builder().user_agent("pageledger/0.1").build()?;
        let sas_token = sas_token
            .map(|token| token.trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());

        tracing::debug!(
            container = %container,
            has_sas = sas_token.is_some(),
            "Initialized blob container client"
        );
        Ok(Self {
            client,
            container,
            sas_token,
        })
    }

    /// Public URL of `name`, without credentials.
    fn object_url(&self, name: &str) -> Result<Url, AdapterError> {
        validate_name(name)?;
        let mut url = self.container.clone();
        url.set_query(None);
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AdapterError::InvalidInput(format!("invalid container URL: {}", self.container))
            })?;
            segments.pop_if_empty();
            segments.extend(name.split('/'));
        }
        Ok(url)
    }

    fn request(&self, method: Method, name: &str) -> Result<reqwest::RequestBuilder, AdapterError> {
        let mut url = self.object_url(name)?;
        if let Some(token) = &self.sas_token {
            url.set_query(Some(token));
        }
        Ok(self.client.request(method, url))
    }
}

#[async_trait]
impl ObjectStorage for BlobContainerStore {
    async fn put(&self, bytes: &[u8], name: &str) -> Result<String, AdapterError> {
        let response = self
            .request(Method::PUT, name)?
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let error = AdapterError::from_response(response).await;
            tracing::error!(object = name, error = %error, "Blob upload failed");
            return Err(error);
        }
        tracing::debug!(object = name, size = bytes.len(), "Blob uploaded");
        Ok(self.object_url(name)?.to_string())
    }

    async fn exists(&self, name: &str) -> Result<bool, AdapterError> {
        let response = self.request(Method::HEAD, name)?.send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(AdapterError::from_response(response).await),
        }
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, AdapterError> {
        let response = self.request(Method::GET, name)?.send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(AdapterError::NotFound(name.to_string())),
            _ => Err(AdapterError::from_response(response).await),
        }
    }
}
