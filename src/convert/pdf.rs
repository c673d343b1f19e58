//! PDF rendering through Pdfium.

use super::{ConversionError, DocumentConverter, Page, has_extension};
use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use pdfium_render::prelude::{PdfRenderConfig, Pdfium, PdfiumError};
use std::env;
use std::path::{Path, PathBuf};

const PDF_EXTENSIONS: &[&str] = &[".pdf"];

/// Renders every page of a PDF to PNG at a fixed target width.
#[derive(Debug, Clone, Copy)]
pub struct PdfConverter {
    target_width: u32,
}

impl PdfConverter {
    /// Converter rendering pages `target_width` pixels wide.
    pub fn new(target_width: u32) -> Self {
        Self { target_width }
    }
}

#[async_trait]
impl DocumentConverter for PdfConverter {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn can_process(&self, locator: &str) -> bool {
        has_extension(locator, PDF_EXTENSIONS)
    }

    async fn convert(&self, _locator: &str, bytes: &[u8]) -> Result<Vec<Page>, ConversionError> {
        let bytes = bytes.to_vec();
        let target_width = self.target_width;
        tokio::task::spawn_blocking(move || render_pages(&bytes, target_width))
            .await
            .map_err(|err| ConversionError::Task(err.to_string()))?
    }
}

fn render_pages(bytes: &[u8], target_width: u32) -> Result<Vec<Page>, ConversionError> {
    let pdfium = load_pdfium().map_err(|err| pdf_error("load pdfium", err))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| pdf_error("open document", err))?;

    let mut pages = Vec::with_capacity(document.pages().len() as usize);
    for (index, page) in document.pages().iter().enumerate() {
        let render_config = PdfRenderConfig::new().set_target_width(target_width as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|err| pdf_error(&format!("render page {}", index + 1), err))?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        let rgba = bitmap.as_rgba_bytes();

        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(&rgba, width, height, ColorType::Rgba8.into())?;

        pages.push(Page {
            number: index as u32 + 1,
            png,
            width,
            height,
        });
    }
    Ok(pages)
}

fn pdf_error(step: &str, err: PdfiumError) -> ConversionError {
    ConversionError::Pdf(format!("{step}: {err}"))
}

fn load_pdfium() -> Result<Pdfium, PdfiumError> {
    if let Some(result) = try_bind_from_env("PDFIUM_LIBRARY_PATH") {
        return result;
    }

    match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(primary_err) => match Pdfium::bind_to_system_library() {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(_) => Err(primary_err),
        },
    }
}

fn try_bind_from_env(var: &str) -> Option<Result<Pdfium, PdfiumError>> {
    let value = env::var_os(var)?;
    let path = PathBuf::from(&value);
    let path = Path::new(&path);
    if path.is_dir() {
        let lib_path = Pdfium::pdfium_platform_library_name_at_path(path);
        Some(Pdfium::bind_to_library(lib_path).map(Pdfium::new))
    } else if path.exists() {
        Some(Pdfium::bind_to_library(path).map(Pdfium::new))
    } else {
        None
    }
}
