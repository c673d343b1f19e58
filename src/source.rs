//! Document sources: where the original bytes of a file come from.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use walkdir::WalkDir;

/// One listable file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    /// File name without directories.
    pub name: String,
    /// Locator accepted by [`DocumentSource::fetch`].
    pub locator: String,
    /// Size in bytes as reported by the source.
    pub size: u64,
    /// Last modification time (RFC 3339), when known.
    pub modified_at: Option<String>,
}

/// Restricts which entries [`DocumentSource::list`] returns.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Accepted extensions, lowercase with leading dot. Empty accepts everything.
    pub extensions: Vec<String>,
}

impl ListFilter {
    /// Filter accepting the given extensions; a missing leading dot is added.
    pub fn extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| {
                let ext = ext.as_ref().trim().to_ascii_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .filter(|ext| ext.len() > 1)
            .collect();
        Self { extensions }
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let file_type = crate::convert::file_type_of(&path.to_string_lossy());
        self.extensions.iter().any(|ext| *ext == file_type)
    }
}

/// Read access to original documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Load the full content behind `locator`.
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, AdapterError>;

    /// Enumerate files below `folder`, ordered by locator.
    async fn list(&self, folder: &str, filter: &ListFilter)
    -> Result<Vec<SourceEntry>, AdapterError>;
}

/// Documents stored in a local directory tree; locators are paths relative to the root.
#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    root: PathBuf,
}

impl LocalFolderSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory locators are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, AdapterError> {
        let relative = Path::new(locator);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(AdapterError::InvalidInput(format!(
                "locator escapes source root: {locator}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn locator_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl DocumentSource for LocalFolderSource {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, AdapterError> {
        let path = self.resolve(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AdapterError::NotFound(locator.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(
        &self,
        folder: &str,
        filter: &ListFilter,
    ) -> Result<Vec<SourceEntry>, AdapterError> {
        let dir = self.resolve(folder)?;
        if !dir.is_dir() {
            return Err(AdapterError::NotFound(folder.to_string()));
        }

        let this = self.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || this.walk(&dir, &filter))
            .await
            .map_err(|err| AdapterError::Io(std::io::Error::other(err)))
    }
}

impl LocalFolderSource {
    fn walk(&self, dir: &Path, filter: &ListFilter) -> Vec<SourceEntry> {
        let mut entries: Vec<SourceEntry> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && filter.accepts(entry.path()))
            .map(|entry| {
                let metadata = entry.metadata().ok();
                SourceEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    locator: self.locator_for(entry.path()),
                    size: metadata.as_ref().map(|meta| meta.len()).unwrap_or(0),
                    modified_at: metadata
                        .and_then(|meta| meta.modified().ok())
                        .and_then(|modified| OffsetDateTime::from(modified).format(&Rfc3339).ok()),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.locator.cmp(&b.locator));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_matching_files_with_relative_locators() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("inbox/nested")).unwrap();
        fs::write(dir.path().join("inbox/b.pdf"), b"%PDF-b").unwrap();
        fs::write(dir.path().join("inbox/nested/a.PNG"), b"png").unwrap();
        fs::write(dir.path().join("inbox/notes.txt"), b"skip").unwrap();

        let source = LocalFolderSource::new(dir.path());
        let entries = source
            .list("inbox", &ListFilter::extensions(["pdf", ".png"]))
            .await
            .unwrap();

        let locators: Vec<&str> = entries.iter().map(|entry| entry.locator.as_str()).collect();
        assert_eq!(locators, vec!["inbox/b.pdf", "inbox/nested/a.PNG"]);
        assert_eq!(entries[0].name, "b.pdf");
        assert_eq!(entries[0].size, 6);
        assert!(entries[0].modified_at.is_some());
    }

    #[tokio::test]
    async fn fetch_reads_bytes_and_reports_missing_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("doc.pdf"), b"content").unwrap();
        let source = LocalFolderSource::new(dir.path());

        assert_eq!(source.fetch("doc.pdf").await.unwrap(), b"content");
        assert!(matches!(
            source.fetch("missing.pdf").await,
            Err(AdapterError::NotFound(_))
        ));
        assert!(matches!(
            source.fetch("../outside.pdf").await,
            Err(AdapterError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn absolute_locators_are_rejected() {
        let root = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let outside = elsewhere.path().join("secret.pdf");
        fs::write(&outside, b"private").unwrap();
        let source = LocalFolderSource::new(root.path());

        let locator = outside.to_string_lossy().into_owned();
        assert!(matches!(
            source.fetch(&locator).await,
            Err(AdapterError::InvalidInput(_))
        ));
        assert!(matches!(
            source
                .list(&elsewhere.path().to_string_lossy(), &ListFilter::default())
                .await,
            Err(AdapterError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn listing_a_missing_folder_is_not_found() {
        let dir = tempdir().unwrap();
        let source = LocalFolderSource::new(dir.path());
        let err = source
            .list("absent", &ListFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));
    }
}
