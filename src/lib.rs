//! # pdf2seq
//!
//! Convert batches of PDF documents into sequentially numbered page images.
//!
//! ## Why this crate?
//!
//! Bulk-scanning workflows feed many PDFs into one logical batch (a
//! *session*) and expect a single, gap-free stream of numbered page images
//! out the other end — `0000001.jpeg`, `0000002.jpeg`, … — even though the
//! documents convert concurrently. Naïve pipelines either serialise
//! everything behind one lock or hand out duplicate numbers under load.
//! This crate keeps per-document conversion fully parallel while an atomic
//! per-session allocator guarantees every page a unique, contiguous number.
//!
//! ## Pipeline Overview
//!
//! ```text
//! session ──▶ job(s) ──▶ fetch ──▶ render ──▶ encode ──▶ persist + number
//!    │           │      (retry/    (pdfium,   (jpeg/png)  0000001.jpeg …
//!    │           │       backoff)   blocking)
//!    └── status store ◀── per-page progress ──┘
//!             │
//!             └──▶ notifier: pollable snapshot streams until terminal
//! ```
//!
//! * A **session** owns the sequence-number cursor and an overall status.
//! * Each **job** converts one document as its own spawned task; job
//!   failures never abort sibling jobs.
//! * The **orchestrator** rolls the session terminal once every job is.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2seq::{ConvertConfig, DocumentSource, JobOrchestrator, PdfiumRenderer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConvertConfig::builder()
//!         .dpi(300)
//!         .output_root("local_storage")
//!         .build()?;
//!
//!     let orchestrator = JobOrchestrator::new(config, Arc::new(PdfiumRenderer::new()));
//!
//!     let session = orchestrator.create_session(Some(1));
//!     let job = orchestrator.register_job(&session.session_id)?;
//!     let handle = orchestrator.submit(
//!         &session.session_id,
//!         &job.job_id,
//!         DocumentSource::Local("document.pdf".into()),
//!         300,
//!     )?;
//!
//!     let images = handle.await??;
//!     for image in &images {
//!         println!("page {} -> {}", image.page_index + 1, image.filename);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Integration surface
//!
//! A transport layer (HTTP, CLI, …) needs exactly three touch points:
//! [`JobOrchestrator::submit`] to kick off work after an upload completes,
//! the status stores' `get` for point reads, and [`StatusNotifier`] for
//! live progress streams. State is process-lifetime only; nothing here
//! persists across restarts.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fetch;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod sequence;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConvertConfig, ConvertConfigBuilder, ImageFormat};
pub use error::Pdf2SeqError;
pub use fetch::{
    HttpObjectStore, LocalObjectStore, ObjectStore, RetryPolicy, RetryingFetcher, StoreError,
};
pub use notifier::StatusNotifier;
pub use orchestrator::{DocumentSource, JobOrchestrator};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use pipeline::worker::{ConversionWorker, ImageDescriptor};
pub use sequence::{image_filename, SequenceAllocator, SEQUENCE_WIDTH};
pub use status::{
    JobState, JobStatus, JobStore, SessionState, SessionStatus, SessionStore, StatusStore,
};
