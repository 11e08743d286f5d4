//! Image encoding: `DynamicImage` → jpeg/png bytes ready for persistence.
//!
//! JPEG is the system default (the downstream consumer expects `.jpeg`
//! files); PNG is available for callers that need lossless output. JPEG
//! encoding rejects alpha channels, so rasters are flattened to RGB8 first —
//! pdfium renders on an opaque white background, nothing is lost.

use crate::config::ImageFormat;
use crate::error::Pdf2SeqError;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page in the configured output format.
pub fn encode_image(
    img: &DynamicImage,
    format: ImageFormat,
    page_index: usize,
) -> Result<Vec<u8>, Pdf2SeqError> {
    let mut buf = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg),
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png),
    };

    result.map_err(|e| Pdf2SeqError::EncodeFailed {
        page: page_index + 1,
        detail: e.to_string(),
    })?;

    debug!(
        page = page_index + 1,
        bytes = buf.len(),
        format = format.extension(),
        "encoded page"
    );
    Ok(buf)
}
