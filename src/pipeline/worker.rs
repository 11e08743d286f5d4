//! Per-document conversion: render every page, number it, persist it.
//!
//! One worker run converts exactly one document for one job. The worker is
//! where the session's invariants are enforced:
//!
//! * the full page range is reserved from the [`SequenceAllocator`] in one
//!   atomic step, so concurrent jobs never interleave numbers within a
//!   document;
//! * the committed cursor (and the session's `image_cursor`) advances one
//!   page at a time, so a mid-document failure leaves the cursor at exactly
//!   the number of pages actually rendered;
//! * every status transition is written to the stores *before* an error
//!   surfaces to the caller.
//!
//! A render failure aborts the remaining pages of this document only.
//! Images already written and numbers already consumed are kept — the
//! pipeline is not transactional across pages.

use crate::config::ConvertConfig;
use crate::error::Pdf2SeqError;
use crate::fetch::ObjectStore;
use crate::pipeline::{encode, render::PageRenderer};
use crate::sequence::{image_filename, SequenceAllocator};
use crate::status::{JobState, JobStore, SessionState, SessionStore};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One rendered page: its assigned number and where it landed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Globally unique sequence number within the session.
    pub sequence: u64,
    /// 0-indexed page within the source document.
    pub page_index: usize,
    /// Zero-padded filename, e.g. `0000042.jpeg`.
    pub filename: String,
    /// Full path of the persisted image.
    pub path: PathBuf,
}

/// Converts one document's pages into sequentially numbered images.
///
/// Cheap to clone; all shared state is behind `Arc`s. Construct one per
/// pipeline and reuse it across jobs, or let [`crate::JobOrchestrator`]
/// drive it.
#[derive(Clone)]
pub struct ConversionWorker {
    config: ConvertConfig,
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    allocator: Arc<SequenceAllocator>,
    renderer: Arc<dyn PageRenderer>,
    mirror: Option<Arc<dyn ObjectStore>>,
}

impl ConversionWorker {
    pub fn new(
        config: ConvertConfig,
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        allocator: Arc<SequenceAllocator>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            config,
            sessions,
            jobs,
            allocator,
            renderer,
            mirror: None,
        }
    }

    /// Mirror every persisted image to `store`, best-effort.
    pub fn with_mirror(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.mirror = Some(store);
        self
    }

    /// Convert the document at `pdf_path` for `job_id`, drawing sequence
    /// numbers from `session_id`'s allocator.
    ///
    /// On success the job is `completed` at progress 100. On any failure
    /// the job is `error` with the causing message before the error is
    /// returned; pages already rendered stay on disk and keep their
    /// numbers.
    pub async fn convert(
        &self,
        session_id: &str,
        job_id: &str,
        pdf_path: &Path,
        dpi: u32,
    ) -> Result<Vec<ImageDescriptor>, Pdf2SeqError> {
        self.jobs.update_active(job_id, |j| {
            j.status = JobState::Processing;
            j.message = format!("converting '{}'", pdf_path.display());
        });

        match self.convert_inner(session_id, job_id, pdf_path, dpi).await {
            Ok(images) => {
                info!(
                    session_id,
                    job_id,
                    images = images.len(),
                    "document conversion completed"
                );
                self.jobs.update_active(job_id, |j| {
                    j.status = JobState::Completed;
                    j.progress = 100.0;
                    j.message = format!("{} pages converted", images.len());
                    j.completed_at = Some(Utc::now());
                });
                Ok(images)
            }
            Err(e) => {
                warn!(session_id, job_id, error = %e, "document conversion failed");
                self.fail_job(job_id, &e);
                Err(e)
            }
        }
    }

    async fn convert_inner(
        &self,
        session_id: &str,
        job_id: &str,
        pdf_path: &Path,
        dpi: u32,
    ) -> Result<Vec<ImageDescriptor>, Pdf2SeqError> {
        if !pdf_path.exists() {
            return Err(Pdf2SeqError::DocumentNotFound {
                path: pdf_path.to_path_buf(),
            });
        }

        let total_pages = {
            let renderer = Arc::clone(&self.renderer);
            let path = pdf_path.to_path_buf();
            tokio::task::spawn_blocking(move || renderer.page_count(&path))
                .await
                .map_err(|e| Pdf2SeqError::Internal(format!("page-count task panicked: {e}")))??
        };

        // An empty document is a no-op success, not an error: nothing to
        // render, no numbers consumed.
        if total_pages == 0 {
            debug!(session_id, job_id, "document has zero pages");
            return Ok(Vec::new());
        }

        // Reserve the whole contiguous range up front; this is the only
        // cross-job synchronisation point in the pipeline.
        let start = self.allocator.allocate(session_id, total_pages as u64)?;
        info!(
            session_id,
            job_id,
            total_pages,
            start_number = start,
            "reserved sequence range"
        );

        let images_dir = self.config.images_dir(session_id);
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|e| Pdf2SeqError::ImageWriteFailed {
                path: images_dir.clone(),
                source: e,
            })?;

        let mut images = Vec::with_capacity(total_pages);
        for page_index in 0..total_pages {
            let raster = {
                let renderer = Arc::clone(&self.renderer);
                let path = pdf_path.to_path_buf();
                tokio::task::spawn_blocking(move || renderer.render_page(&path, page_index, dpi))
                    .await
                    .map_err(|e| Pdf2SeqError::Internal(format!("render task panicked: {e}")))??
            };

            let bytes = encode::encode_image(&raster, self.config.format, page_index)?;

            let sequence = start + page_index as u64;
            let filename = image_filename(sequence, self.config.format);
            let image_path = images_dir.join(&filename);

            tokio::fs::write(&image_path, &bytes).await.map_err(|e| {
                Pdf2SeqError::ImageWriteFailed {
                    path: image_path.clone(),
                    source: e,
                }
            })?;

            self.advance_cursor(session_id, page_index, total_pages);
            self.mirror_image(&filename, &bytes).await;

            let progress = (page_index + 1) as f32 / total_pages as f32 * 100.0;
            self.jobs.update_active(job_id, |j| {
                j.progress = j.progress.max(progress);
                j.message = format!("page {}/{} rendered", page_index + 1, total_pages);
            });

            images.push(ImageDescriptor {
                sequence,
                page_index,
                filename,
                path: image_path,
            });
        }

        Ok(images)
    }

    /// Commit one rendered page and mirror the cursor into the session
    /// status. A missing session (deleted mid-run) logs and moves on; the
    /// job still completes.
    fn advance_cursor(&self, session_id: &str, page_index: usize, total_pages: usize) {
        match self.allocator.commit(session_id, 1) {
            Ok(cursor) => {
                self.sessions.update_active(session_id, |s| {
                    s.status = SessionState::Processing;
                    s.image_cursor = cursor;
                    s.message = format!("page {}/{} rendered", page_index + 1, total_pages);
                });
            }
            Err(e) => {
                warn!(session_id, "session vanished mid-conversion: {e}");
            }
        }
    }

    /// Best-effort mirror of a persisted image to the remote store.
    /// Mirror keys carry no session prefix: the consumer expects a flat,
    /// globally numbered namespace.
    async fn mirror_image(&self, filename: &str, bytes: &[u8]) {
        let Some(store) = &self.mirror else {
            return;
        };
        if let Err(e) = store.put(filename, bytes).await {
            warn!(filename, "failed to mirror image: {e}");
        }
    }

    fn fail_job(&self, job_id: &str, error: &Pdf2SeqError) {
        let message = error.to_string();
        self.jobs.update_active(job_id, |j| {
            j.status = JobState::Error;
            j.message = message.clone();
            j.error = Some(message.clone());
            j.completed_at = Some(Utc::now());
        });
    }
}
