//! Pipeline stages for PDF-to-numbered-image conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping the
//! stages separate makes each independently testable and lets us swap
//! implementations (e.g. a fake renderer in tests) without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ render ──▶ encode ──▶ persist + number
//! (PDF path)  (pdfium)  (jpeg/png)  (worker)
//! ```
//!
//! 1. [`render`] — rasterise one page at a time; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 2. [`encode`] — encode the raster to the configured output format
//! 3. [`worker`] — drive the per-document loop: reserve sequence numbers,
//!    persist each image under its number, emit progress, mirror best-effort

pub mod encode;
pub mod render;
pub mod worker;
