use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Placeholder reported instead of secret values.
pub const REDACTED: &str = "***";

/// Runtime configuration for the ingestion engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// SQLite file backing the status store.
    pub database_path: PathBuf,
    /// Root directory the local document source resolves locators against.
    pub source_root: PathBuf,
    /// `file://` directory or `http(s)://` blob container for archived originals.
    pub object_store_url: String,
    /// Optional SAS query string for HTTP blob containers.
    pub object_store_sas_token: Option<String>,
    /// Prefix prepended to every object key.
    pub object_prefix: String,
    /// Base URL of the Qdrant instance that stores page vectors.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding page vectors.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding backend used for page images.
    pub embedding_provider: EmbeddingProvider,
    /// Endpoint of the HTTP embedding service.
    pub embedding_url: Option<String>,
    /// Model identifier forwarded to the HTTP embedding service.
    pub embedding_model: Option<String>,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Pixel width PDF pages are rendered at.
    pub pdf_render_width: u32,
    /// Failed attempts after which a file is no longer retried.
    pub max_retries: u32,
    /// File pipelines run concurrently by one batch.
    pub batch_concurrency: usize,
    /// Embedding calls allowed in flight at once.
    pub embed_concurrency: usize,
    /// Deadline applied to each external adapter call, in seconds.
    pub stage_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote model server reached over HTTP.
    Http,
    /// Offline hashing embedder.
    Deterministic,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let embedding_provider = vars
            .parsed::<EmbeddingProvider>("EMBEDDING_PROVIDER")?
            .unwrap_or(EmbeddingProvider::Deterministic);
        let embedding_url = vars.optional("EMBEDDING_URL");
        if embedding_provider == EmbeddingProvider::Http && embedding_url.is_none() {
            return Err(ConfigError::MissingVariable("EMBEDDING_URL".to_string()));
        }

        let config = Self {
            database_path: vars
                .optional("DATABASE_PATH")
                .unwrap_or_else(|| "pageledger.db".to_string())
                .into(),
            source_root: vars
                .optional("SOURCE_ROOT")
                .unwrap_or_else(|| ".".to_string())
                .into(),
            object_store_url: vars
                .optional("OBJECT_STORE_URL")
                .unwrap_or_else(|| "file://./objects".to_string()),
            object_store_sas_token: vars.optional("OBJECT_STORE_SAS_TOKEN"),
            object_prefix: vars
                .optional("OBJECT_PREFIX")
                .map(|prefix| prefix.trim_matches('/').to_string())
                .unwrap_or_else(|| "documents".to_string()),
            qdrant_url: vars.required("QDRANT_URL")?,
            qdrant_collection_name: vars
                .optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "document-pages".to_string()),
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_url,
            embedding_model: vars.optional("EMBEDDING_MODEL"),
            embedding_dimension: vars.positive("EMBEDDING_DIMENSION", 128)?,
            pdf_render_width: vars.positive("PDF_RENDER_WIDTH", 1024)?,
            max_retries: vars.parsed("MAX_RETRIES")?.unwrap_or(3),
            batch_concurrency: vars.positive("BATCH_CONCURRENCY", 4)?,
            embed_concurrency: vars.positive("EMBED_CONCURRENCY", 2)?,
            stage_timeout_secs: vars.positive("STAGE_TIMEOUT_SECS", 120)?,
            server_port: vars.parsed("SERVER_PORT")?,
        };

        tracing::debug!(
            database = %config.database_path.display(),
            qdrant_url = %config.qdrant_url,
            collection = %config.qdrant_collection_name,
            embedding_provider = ?config.embedding_provider,
            max_retries = config.max_retries,
            server_port = ?config.server_port,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Deadline applied to each adapter call.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Copy safe to show to operators: API key, SAS token and URL query strings are masked.
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());
        Self {
            object_store_url: redact_query(&self.object_store_url),
            object_store_sas_token: mask(&self.object_store_sas_token),
            qdrant_url: redact_query(&self.qdrant_url),
            qdrant_api_key: mask(&self.qdrant_api_key),
            embedding_url: self.embedding_url.as_deref().map(redact_query),
            ..self.clone()
        }
    }
}

fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?{REDACTED}"),
        None => url.to_string(),
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parsed(key)?.unwrap_or(default);
        if value > T::default() {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue(key.to_string()))
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "deterministic" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults_when_only_qdrant_is_set() {
        let config = load(&[("QDRANT_URL", "http://localhost:6333")]).unwrap();
        assert_eq!(config.database_path, PathBuf::from("pageledger.db"));
        assert_eq!(config.object_store_url, "file://./objects");
        assert_eq!(config.object_prefix, "documents");
        assert_eq!(config.qdrant_collection_name, "document-pages");
        assert_eq!(config.embedding_provider, EmbeddingProvider::Deterministic);
        assert_eq!(config.embedding_dimension, 128);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.embed_concurrency, 2);
        assert_eq!(config.stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.server_port, None);
    }

    #[test]
    fn qdrant_url_is_required() {
        assert!(matches!(
            load(&[]),
            Err(ConfigError::MissingVariable(key)) if key == "QDRANT_URL"
        ));
    }

    #[test]
    fn http_provider_requires_endpoint() {
        let err = load(&[
            ("QDRANT_URL", "http://localhost:6333"),
            ("EMBEDDING_PROVIDER", "HTTP"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(key) if key == "EMBEDDING_URL"));

        let config = load(&[
            ("QDRANT_URL", "http://localhost:6333"),
            ("EMBEDDING_PROVIDER", "http"),
            ("EMBEDDING_URL", "http://localhost:8000/embed"),
        ])
        .unwrap();
        assert_eq!(config.embedding_provider, EmbeddingProvider::Http);
    }

    #[test]
    fn rejects_unparseable_and_zero_values() {
        for (key, value) in [
            ("MAX_RETRIES", "three"),
            ("BATCH_CONCURRENCY", "0"),
            ("SERVER_PORT", "70000"),
            ("EMBEDDING_PROVIDER", "openai"),
        ] {
            let err = load(&[("QDRANT_URL", "http://localhost:6333"), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue(ref name) if name == key),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn redacted_copy_masks_secrets_and_keeps_the_rest() {
        let config = load(&[
            ("QDRANT_URL", "http://localhost:6333"),
            ("QDRANT_API_KEY", "qdrant-secret"),
            ("OBJECT_STORE_URL", "https://acct.blob.core.windows.net/docs?sv=2024&sig=abc"),
            ("OBJECT_STORE_SAS_TOKEN", "sv=2024&sig=abc"),
        ])
        .unwrap();

        let shown = config.redacted();
        assert_eq!(shown.qdrant_api_key.as_deref(), Some(REDACTED));
        assert_eq!(shown.object_store_sas_token.as_deref(), Some(REDACTED));
        assert_eq!(
            shown.object_store_url,
            "https://acct.blob.core.windows.net/docs?***"
        );
        assert_eq!(shown.qdrant_url, "http://localhost:6333");
        assert_eq!(shown.max_retries, config.max_retries);

        let json = serde_json::to_string(&shown).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("sig=abc"));
        assert!(json.contains("\"embedding_provider\":\"deterministic\""));

        let plain = load(&[("QDRANT_URL", "http://localhost:6333")]).unwrap();
        assert_eq!(plain.redacted().qdrant_api_key, None);
    }

    #[test]
    fn object_prefix_is_trimmed() {
        let config = load(&[
            ("QDRANT_URL", "http://localhost:6333"),
            ("OBJECT_PREFIX", "/archive/"),
            ("MAX_RETRIES", "0"),
        ])
        .unwrap();
        assert_eq!(config.object_prefix, "archive");
        assert_eq!(config.max_retries, 0);
    }
}
