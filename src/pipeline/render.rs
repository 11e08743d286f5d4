//! Page rasterisation: render one PDF page to a `DynamicImage` via pdfium.
//!
//! ## Why a trait?
//!
//! Rendering is a pure capability — "page N of document D at DPI X → raster"
//! — and the only stage that needs a native library. Hiding pdfium behind
//! [`PageRenderer`] lets the worker and orchestrator be tested with a fake
//! renderer, and keeps the pdfium dependency in one file.
//!
//! ## Why spawn_blocking at the call site?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. The trait is therefore synchronous; the worker moves each call
//! onto the blocking thread pool with `tokio::task::spawn_blocking` so
//! Tokio worker threads never stall on CPU-heavy rendering.

use crate::error::Pdf2SeqError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Capability to inspect and rasterise a paginated document.
///
/// Implementations must be cheap to share (`Send + Sync`); the production
/// [`PdfiumRenderer`] is stateless and re-opens the document per call.
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document at `path`.
    fn page_count(&self, path: &Path) -> Result<usize, Pdf2SeqError>;

    /// Rasterise the 0-indexed page at the given DPI.
    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, Pdf2SeqError>;
}

/// Production renderer backed by pdfium.
#[derive(Debug, Default)]
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self
    }

    fn open<'a>(
        pdfium: &'a Pdfium,
        path: &Path,
    ) -> Result<PdfDocument<'a>, Pdf2SeqError> {
        pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| Pdf2SeqError::CorruptDocument {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, Pdf2SeqError> {
        let pdfium = Pdfium::default();
        let document = Self::open(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, Pdf2SeqError> {
        let pdfium = Pdfium::default();
        let document = Self::open(&pdfium, path)?;
        let pages = document.pages();
        let total = pages.len() as usize;

        if page_index >= total {
            return Err(Pdf2SeqError::RenderFailed {
                page: page_index + 1,
                detail: format!("page out of range (document has {total} pages)"),
            });
        }

        let page =
            pages
                .get(page_index as u16)
                .map_err(|e| Pdf2SeqError::RenderFailed {
                    page: page_index + 1,
                    detail: format!("{e:?}"),
                })?;

        // PDF user space is 72 points per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| Pdf2SeqError::RenderFailed {
                    page: page_index + 1,
                    detail: format!("{e:?}"),
                })?;

        let image = bitmap.as_image();
        debug!(
            page = page_index + 1,
            width = image.width(),
            height = image.height(),
            dpi,
            "rendered page"
        );
        Ok(image)
    }
}
