//! Single-page conversion for raster images.

use super::{ConversionError, DocumentConverter, Page, has_extension};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

const IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".bmp", ".tif", ".tiff", ".webp",
];

/// Decodes an image, normalizes it to RGB, and re-encodes it as one PNG page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

impl ImageConverter {
    /// New image converter.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentConverter for ImageConverter {
    fn name(&self) -> &'static str {
        "image"
    }

    fn can_process(&self, locator: &str) -> bool {
        has_extension(locator, IMAGE_EXTENSIONS)
    }

    async fn convert(&self, _locator: &str, bytes: &[u8]) -> Result<Vec<Page>, ConversionError> {
        let bytes = bytes.to_vec();
        let page = tokio::task::spawn_blocking(move || normalize(&bytes))
            .await
            .map_err(|err| ConversionError::Task(err.to_string()))??;
        Ok(vec![page])
    }
}

fn normalize(bytes: &[u8]) -> Result<Page, ConversionError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(Page {
        number: 1,
        png,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn converts_image_into_single_rgb_page() {
        let pages = ImageConverter::new()
            .convert("scan.png", &sample_png())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].width, pages[0].height), (4, 3));
        let decoded = image::load_from_memory(&pages[0].png).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[tokio::test]
    async fn garbage_bytes_are_an_image_error() {
        let err = ImageConverter::new()
            .convert("scan.jpg", b"not an image")
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Image(_)));
    }

    #[test]
    fn accepts_common_raster_extensions() {
        let converter = ImageConverter::new();
        for name in ["a.png", "b.JPEG", "c.tiff", "d.webp", "e.bmp"] {
            assert!(converter.can_process(name), "{name}");
        }
        assert!(!converter.can_process("f.gif"));
    }
}
