//! Document-to-page-image conversion.
//!
//! Converters are tried in registration order and the first one whose
//! [`DocumentConverter::can_process`] accepts the locator handles the file. A file nobody
//! accepts is reported as [`ConversionError::UnsupportedFileType`]; that outcome is final for
//! the file but never fatal for the batch it belongs to.

pub mod image;
pub mod pdf;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use self::image::ImageConverter;
pub use self::pdf::PdfConverter;

/// Errors produced while turning a document into page images.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// No registered converter accepts the file.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// A converter accepted the file but produced no pages.
    #[error("{converter} produced no pages for {locator}")]
    EmptyOutput {
        /// Converter that ran.
        converter: &'static str,
        /// File that was converted.
        locator: String,
    },
    /// PDF could not be loaded or rendered.
    #[error("pdf rendering failed: {0}")]
    Pdf(String),
    /// Image could not be decoded or re-encoded.
    #[error("image processing failed: {0}")]
    Image(#[from] ::image::ImageError),
    /// Blocking conversion task panicked or was cancelled.
    #[error("conversion task failed: {0}")]
    Task(String),
}

/// One rendered page, encoded as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number within the file.
    pub number: u32,
    /// PNG-encoded image bytes.
    pub png: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Strategy that turns one kind of document into page images.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this converter handles the file at `locator`.
    fn can_process(&self, locator: &str) -> bool;

    /// Render `bytes` (the content of `locator`) into pages.
    async fn convert(&self, locator: &str, bytes: &[u8]) -> Result<Vec<Page>, ConversionError>;
}

/// Ordered collection of converters.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: Vec<Box<dyn DocumentConverter>>,
}

impl ConverterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// PDF first, then single images.
    pub fn with_defaults(pdf_render_width: u32) -> Self {
        Self::new()
            .with(PdfConverter::new(pdf_render_width))
            .with(ImageConverter::new())
    }

    /// Append a converter with the lowest priority so far.
    pub fn with<C>(mut self, converter: C) -> Self
    where
        C: DocumentConverter + 'static,
    {
        self.converters.push(Box::new(converter));
        self
    }

    /// First converter that accepts `locator`.
    pub fn find(&self, locator: &str) -> Option<&dyn DocumentConverter> {
        self.converters
            .iter()
            .map(|converter| converter.as_ref())
            .find(|converter| converter.can_process(locator))
    }

    /// Whether any converter accepts `locator`.
    pub fn supports(&self, locator: &str) -> bool {
        self.find(locator).is_some()
    }

    /// Convert with the first matching converter, requiring at least one page.
    ///
    /// Pages are renumbered `1..=n` in the order the converter returned them.
    pub async fn convert(&self, locator: &str, bytes: &[u8]) -> Result<Vec<Page>, ConversionError> {
        let converter = self
            .find(locator)
            .ok_or_else(|| ConversionError::UnsupportedFileType(display_type(locator)))?;

        tracing::debug!(converter = converter.name(), locator, "Converting document");
        let mut pages = converter.convert(locator, bytes).await?;
        if pages.is_empty() {
            return Err(ConversionError::EmptyOutput {
                converter: converter.name(),
                locator: locator.to_string(),
            });
        }
        for (index, page) in pages.iter_mut().enumerate() {
            page.number = index as u32 + 1;
        }
        tracing::debug!(
            converter = converter.name(),
            locator,
            pages = pages.len(),
            "Document converted"
        );
        Ok(pages)
    }
}

/// Lowercase extension of `locator` including the leading dot, or an empty string.
pub fn file_type_of(locator: &str) -> String {
    Path::new(locator)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn display_type(locator: &str) -> String {
    let file_type = file_type_of(locator);
    if file_type.is_empty() {
        format!("{locator} (no extension)")
    } else {
        file_type
    }
}

pub(crate) fn has_extension(locator: &str, accepted: &[&str]) -> bool {
    let file_type = file_type_of(locator);
    accepted.iter().any(|candidate| *candidate == file_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        ext: &'static str,
        pages: usize,
    }

    #[async_trait]
    impl DocumentConverter for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_process(&self, locator: &str) -> bool {
            has_extension(locator, &[self.ext])
        }

        async fn convert(
            &self,
            _locator: &str,
            _bytes: &[u8],
        ) -> Result<Vec<Page>, ConversionError> {
            Ok((0..self.pages)
                .map(|_| Page {
                    number: 0,
                    png: vec![1, 2, 3],
                    width: 1,
                    height: 1,
                })
                .collect())
        }
    }

    #[test]
    fn file_type_is_lowercased_with_dot() {
        assert_eq!(file_type_of("Reports/Q1.PDF"), ".pdf");
        assert_eq!(file_type_of("README"), "");
    }

    #[tokio::test]
    async fn first_matching_converter_wins_and_pages_are_numbered() {
        let registry = ConverterRegistry::new()
            .with(Fixed {
                name: "first",
                ext: ".pdf",
                pages: 3,
            })
            .with(Fixed {
                name: "second",
                ext: ".pdf",
                pages: 1,
            });

        assert_eq!(registry.find("a.pdf").unwrap().name(), "first");
        let pages = registry.convert("a.pdf", b"%PDF").await.unwrap();
        let numbers: Vec<u32> = pages.iter().map(|page| page.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let registry = ConverterRegistry::with_defaults(512);
        let err = registry.convert("notes.docx", b"PK").await.unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedFileType(ref t) if t == ".docx"));
        assert!(!registry.supports("archive.zip"));
        assert!(registry.supports("scan.JPG"));
        assert!(registry.supports("deck.pdf"));
    }

    #[tokio::test]
    async fn empty_output_is_a_conversion_failure() {
        let registry = ConverterRegistry::new().with(Fixed {
            name: "hollow",
            ext: ".pdf",
            pages: 0,
        });
        let err = registry.convert("a.pdf", b"").await.unwrap_err();
        assert!(matches!(err, ConversionError::EmptyOutput { converter: "hollow", .. }));
    }
}
