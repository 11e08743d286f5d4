//! Error types for the pdf2seq library.
//!
//! Two distinct error types reflect two distinct failure boundaries:
//!
//! * [`Pdf2SeqError`] — pipeline errors. Returned by the allocator, worker
//!   and orchestrator. A worker failure is always recorded in the job's
//!   status *before* the error surfaces, so status remains the single
//!   source of truth for user-visible failure.
//!
//! * [`crate::fetch::StoreError`] — object-store errors, classified as
//!   not-found / transient / permanent. The classification drives the
//!   retry policy: transient failures back off and retry, permanent
//!   (credentials/config) failures fail fast.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf2seq pipeline.
#[derive(Debug, Error)]
pub enum Pdf2SeqError {
    // ── Lookup errors ─────────────────────────────────────────────────────
    /// A session id was used before the session was created.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// A job id was used that was never registered.
    #[error("job not found: '{job_id}'")]
    JobNotFound { job_id: String },

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The source document never became visible in the remote store.
    ///
    /// Emitted by [`crate::fetch::RetryingFetcher`] after `max_retries`
    /// backoff rounds. The job that submitted the fetch is marked `error`.
    #[error("document not found in remote store after {attempts} attempts: '{location}' ({reason})")]
    FetchExhausted {
        location: String,
        attempts: u32,
        reason: String,
    },

    /// Bad credentials or store configuration. Never retried.
    #[error("storage configuration error: {reason}")]
    PermanentConfig { reason: String },

    /// A job referenced a remote location but no source store is configured.
    #[error("no source store configured; cannot fetch '{location}'")]
    NoSourceStore { location: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// Source PDF was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    DocumentNotFound { path: PathBuf },

    /// The document exists but could not be opened (corrupt, encrypted).
    /// Not retried: retries belong to fetch, not to rendering.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// A page failed to render. Aborts the remaining pages of the current
    /// document; images and sequence numbers already produced are kept.
    #[error("rendering failed for page {page}: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// A rendered page could not be encoded to the output image format.
    #[error("image encoding failed for page {page}: {detail}")]
    EncodeFailed { page: usize, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not persist a rendered image to disk.
    #[error("failed to write image '{path}': {source}")]
    ImageWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (panicked blocking task etc.).
    #[error("internal error: {0}")]
    Internal(String),
}
