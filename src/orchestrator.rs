//! Session/job lifecycle and per-job task supervision.
//!
//! The orchestrator is the write-side entry point of the pipeline: create a
//! session, register jobs against it, submit each job's source document.
//! Every submitted job runs as its own spawned task — [`submit`] returns
//! the `JoinHandle` so callers (and tests) can await completion
//! deterministically instead of polling wall-clock sleeps, though most
//! callers just discard it and poll statuses.
//!
//! After each job reaches a terminal state the orchestrator re-checks the
//! session: once every registered job is terminal, the session rolls to
//! `completed` (at least one job succeeded) or `error` (none did). The
//! check races benignly with jobs finishing — each completion triggers a
//! fresh check, so the final state always converges.
//!
//! Failures local to one job never abort sibling jobs; the orchestrator
//! aggregates, it does not cancel.
//!
//! [`submit`]: JobOrchestrator::submit

use crate::config::ConvertConfig;
use crate::error::Pdf2SeqError;
use crate::fetch::{ObjectStore, RetryingFetcher};
use crate::notifier::StatusNotifier;
use crate::pipeline::render::PageRenderer;
use crate::pipeline::worker::{ConversionWorker, ImageDescriptor};
use crate::sequence::SequenceAllocator;
use crate::status::{JobState, JobStatus, JobStore, SessionState, SessionStatus, SessionStore};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a job's source document lives.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// Already resident on the local filesystem.
    Local(PathBuf),
    /// Must be fetched from the configured source store first.
    Remote { location: String },
}

/// Spawns and supervises one conversion task per job, and aggregates job
/// outcomes into session outcomes.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: ConvertConfig,
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    allocator: Arc<SequenceAllocator>,
    renderer: Arc<dyn PageRenderer>,
    fetcher: Option<Arc<RetryingFetcher>>,
    mirror: Option<Arc<dyn ObjectStore>>,
    /// Job ids per session — the separate index used to answer "are all
    /// jobs for this session terminal". Sessions themselves own no job
    /// collection.
    session_jobs: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl JobOrchestrator {
    /// Build an orchestrator with fresh stores and the given renderer.
    pub fn new(config: ConvertConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            jobs: Arc::new(JobStore::new()),
            allocator: Arc::new(SequenceAllocator::new()),
            renderer,
            fetcher: None,
            mirror: None,
            session_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Enable fetching of [`DocumentSource::Remote`] jobs from `store`,
    /// with retries per the config's [`crate::fetch::RetryPolicy`].
    pub fn with_source_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.fetcher = Some(Arc::new(RetryingFetcher::new(
            store,
            self.config.retry_policy(),
        )));
        self
    }

    /// Mirror every rendered image to `store`, best-effort.
    pub fn with_mirror_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.mirror = Some(store);
        self
    }

    /// The session status store — the read surface for transports.
    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// The job status store.
    pub fn jobs(&self) -> Arc<JobStore> {
        Arc::clone(&self.jobs)
    }

    /// The session sequence allocator.
    pub fn allocator(&self) -> Arc<SequenceAllocator> {
        Arc::clone(&self.allocator)
    }

    /// A notifier polling this orchestrator's stores at the configured
    /// interval.
    pub fn notifier(&self) -> StatusNotifier {
        StatusNotifier::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.jobs),
            self.config.poll_interval,
        )
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a session whose first image will be numbered `start_number`
    /// (config default when `None`).
    pub fn create_session(&self, start_number: Option<u64>) -> SessionStatus {
        let session_id = Uuid::new_v4().to_string();
        let start = start_number.unwrap_or(self.config.default_start_number);

        self.allocator.register(&session_id, start);
        self.session_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), Vec::new());

        let status = SessionStatus::new(&session_id, start);
        self.sessions.put(&session_id, status.clone());
        info!(session_id, start_number = start, "session created");
        status
    }

    /// Register a new job against an existing session.
    ///
    /// # Errors
    /// [`Pdf2SeqError::SessionNotFound`] if the session was never created
    /// (or has been deleted).
    pub fn register_job(&self, session_id: &str) -> Result<JobStatus, Pdf2SeqError> {
        if self.sessions.get(session_id).is_none() {
            return Err(Pdf2SeqError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        let job_id = Uuid::new_v4().to_string();
        let status = JobStatus::new(&job_id, session_id);
        self.jobs.put(&job_id, status.clone());

        self.session_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .push(job_id.clone());
        self.sessions.update_active(session_id, |s| {
            s.pdf_count += 1;
        });

        info!(session_id, job_id, "job registered");
        Ok(status)
    }

    /// Schedule a registered job's conversion as an independent task.
    ///
    /// The returned handle resolves to the worker's result once the job —
    /// and any session finalisation it triggered — is done. Callers may
    /// discard it; job/session statuses carry the outcome either way.
    pub fn submit(
        &self,
        session_id: &str,
        job_id: &str,
        source: DocumentSource,
        dpi: u32,
    ) -> Result<JoinHandle<Result<Vec<ImageDescriptor>, Pdf2SeqError>>, Pdf2SeqError> {
        if self.sessions.get(session_id).is_none() {
            return Err(Pdf2SeqError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        if self.jobs.get(job_id).is_none() {
            return Err(Pdf2SeqError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }

        self.sessions.update_active(session_id, |s| {
            if s.status == SessionState::Uploading {
                s.status = SessionState::Processing;
                s.message = "conversion started".to_string();
            }
        });

        let this = self.clone();
        let session_id = session_id.to_string();
        let job_id = job_id.to_string();
        Ok(tokio::spawn(async move {
            let result = this.run_job(&session_id, &job_id, source, dpi).await;
            this.finalize_session_if_done(&session_id);
            result
        }))
    }

    /// Delete a session: status record, allocator cursor and job index
    /// (job status records are kept so stragglers remain addressable).
    ///
    /// An in-flight job whose session disappears finishes on its own;
    /// its session-side updates just log and are dropped.
    pub fn delete_session(&self, session_id: &str) {
        self.sessions.delete(session_id);
        self.allocator.remove(session_id);
        self.session_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        info!(session_id, "session deleted");
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn run_job(
        &self,
        session_id: &str,
        job_id: &str,
        source: DocumentSource,
        dpi: u32,
    ) -> Result<Vec<ImageDescriptor>, Pdf2SeqError> {
        let pdf_path = match self.resolve_source(session_id, job_id, source).await {
            Ok(path) => path,
            Err(e) => {
                // Fetch failures bypass the worker; record them here so the
                // job never sits non-terminal.
                self.fail_job(job_id, &e);
                return Err(e);
            }
        };

        self.worker().convert(session_id, job_id, &pdf_path, dpi).await
    }

    /// Make the job's source document resident locally.
    async fn resolve_source(
        &self,
        session_id: &str,
        job_id: &str,
        source: DocumentSource,
    ) -> Result<PathBuf, Pdf2SeqError> {
        match source {
            DocumentSource::Local(path) => Ok(path),
            DocumentSource::Remote { location } => {
                let Some(fetcher) = &self.fetcher else {
                    return Err(Pdf2SeqError::NoSourceStore { location });
                };

                debug!(session_id, job_id, location, "fetching source document");
                let bytes = fetcher.fetch(&location).await?;

                let filename = location
                    .rsplit('/')
                    .next()
                    .filter(|f| !f.is_empty())
                    .unwrap_or("source.pdf");
                let job_dir = self.config.job_dir(session_id, job_id);
                tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
                    Pdf2SeqError::ImageWriteFailed {
                        path: job_dir.clone(),
                        source: e,
                    }
                })?;
                let path = job_dir.join(filename);
                tokio::fs::write(&path, &bytes).await.map_err(|e| {
                    Pdf2SeqError::ImageWriteFailed {
                        path: path.clone(),
                        source: e,
                    }
                })?;
                Ok(path)
            }
        }
    }

    fn worker(&self) -> ConversionWorker {
        let worker = ConversionWorker::new(
            self.config.clone(),
            Arc::clone(&self.sessions),
            Arc::clone(&self.jobs),
            Arc::clone(&self.allocator),
            Arc::clone(&self.renderer),
        );
        match &self.mirror {
            Some(store) => worker.with_mirror(Arc::clone(store)),
            None => worker,
        }
    }

    fn fail_job(&self, job_id: &str, error: &Pdf2SeqError) {
        let message = error.to_string();
        warn!(job_id, "job failed before conversion: {message}");
        self.jobs.update_active(job_id, |j| {
            j.status = JobState::Error;
            j.message = message.clone();
            j.error = Some(message.clone());
            j.completed_at = Some(Utc::now());
        });
    }

    /// Roll the session terminal once every registered job is terminal.
    ///
    /// Evaluated via point reads; a job finishing right after the snapshot
    /// triggers its own check, so convergence is guaranteed.
    fn finalize_session_if_done(&self, session_id: &str) {
        let job_ids = {
            let index = self
                .session_jobs
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match index.get(session_id) {
                Some(ids) if !ids.is_empty() => ids.clone(),
                // Session deleted or nothing registered: nothing to roll.
                _ => return,
            }
        };

        let mut statuses = Vec::with_capacity(job_ids.len());
        for job_id in &job_ids {
            match self.jobs.get(job_id) {
                Some(status) if status.status.is_terminal() => statuses.push(status),
                // A sibling is still running; its completion re-checks.
                _ => return,
            }
        }

        let succeeded = statuses
            .iter()
            .filter(|s| s.status == JobState::Completed)
            .count();
        let failed = statuses.len() - succeeded;
        let first_error = statuses
            .iter()
            .find_map(|s| s.error.clone())
            .unwrap_or_else(|| "conversion failed".to_string());
        let cursor = self.allocator.cursor(session_id).ok();

        let finalized = self.sessions.update_active(session_id, |s| {
            if let Some(cursor) = cursor {
                s.image_cursor = cursor;
            }
            if succeeded == 0 {
                s.status = SessionState::Error;
                s.message = first_error.clone();
            } else {
                s.status = SessionState::Completed;
                s.progress = 100.0;
                s.message = if failed == 0 {
                    format!("{} documents converted", succeeded)
                } else {
                    format!(
                        "{} of {} documents converted ({} failed)",
                        succeeded,
                        statuses.len(),
                        failed
                    )
                };
            }
        });

        if finalized {
            info!(
                session_id,
                succeeded, failed, "session rolled to terminal state"
            );
        }
    }
}
