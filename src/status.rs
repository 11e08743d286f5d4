//! Session/job status records and the concurrency-safe status store.
//!
//! The store is the sole surface a transport layer needs to bridge into
//! status responses: workers `put`/`update` as they progress, pollers `get`.
//! Each instance has an explicit lifecycle — construct one per pipeline (or
//! per test); there are no process-wide singletons.
//!
//! ## Terminal-state guard
//!
//! Once a record is `completed` or `error` it is never mutated by the
//! pipeline again. Internal writes go through [`StatusStore::update_active`],
//! which skips terminal records. [`StatusStore::put`] replaces a record
//! unconditionally and is the explicit override escape hatch for external
//! administrative tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created; documents are still being placed.
    Uploading,
    /// At least one job has been submitted for conversion.
    Processing,
    /// All jobs terminal, at least one succeeded.
    Completed,
    /// All jobs terminal, none succeeded (or the pipeline failed outright).
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Error)
    }
}

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, source document not yet processed.
    Pending,
    /// Worker is converting pages.
    Processing,
    /// All pages rendered.
    Completed,
    /// Conversion aborted; `error` holds the cause.
    Error,
    /// Synthetic state returned when a caller polls an unknown job id.
    /// Never stored, always terminal.
    NotFound,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Error | JobState::NotFound
        )
    }
}

/// Pollable status record for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub status: SessionState,
    /// Overall progress in `[0, 100]`, monotonically non-decreasing while
    /// the session is active.
    pub progress: f32,
    /// Human-readable last-event description.
    pub message: String,
    /// Number of documents registered in this session.
    pub pdf_count: usize,
    /// Next sequence number to hand out, i.e. `start_number` plus the count
    /// of pages successfully rendered so far. Never decreases.
    pub image_cursor: u64,
    pub created_at: DateTime<Utc>,
}

impl SessionStatus {
    /// Fresh session record in the `uploading` state.
    pub fn new(session_id: impl Into<String>, start_number: u64) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionState::Uploading,
            progress: 0.0,
            message: "session initialised".to_string(),
            pdf_count: 0,
            image_cursor: start_number,
            created_at: Utc::now(),
        }
    }
}

/// Pollable status record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    /// Back-reference only; the session does not own a list of job ids.
    pub session_id: String,
    pub status: JobState,
    /// Per-job progress in `[0, 100]`.
    pub progress: f32,
    pub message: String,
    /// Set exactly once, on the transition to [`JobState::Error`].
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// Fresh job record in the `pending` state.
    pub fn new(job_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            session_id: session_id.into(),
            status: JobState::Pending,
            progress: 0.0,
            message: "job initialised".to_string(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Synthetic terminal record for a job id that was never created.
    ///
    /// Returned to callers who explicitly requested a status and expect one
    /// to exist; never written to the store.
    pub fn not_found(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            session_id: String::new(),
            status: JobState::NotFound,
            progress: 0.0,
            message: format!("job not found: {job_id}"),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            job_id,
        }
    }
}

/// Records that have a terminal state the store's write guard can check.
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}

impl Terminal for SessionStatus {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Terminal for JobStatus {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Concurrency-safe key → status map.
///
/// Every operation takes the lock for a single map access, so readers are
/// never blocked on a writer for longer than one update. Absence on `get`
/// is a valid result (`None`), not an error.
#[derive(Debug)]
pub struct StatusStore<T> {
    entries: RwLock<HashMap<String, T>>,
}

/// Store of [`SessionStatus`] records keyed by session id.
pub type SessionStore = StatusStore<SessionStatus>;
/// Store of [`JobStatus`] records keyed by job id.
pub type JobStore = StatusStore<JobStatus>;

impl<T> Default for StatusStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StatusStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the status for `key` unconditionally.
    ///
    /// This is also the explicit override for terminal records; pipeline
    /// code uses [`Self::update_active`] instead.
    pub fn put(&self, key: &str, value: T) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    /// Remove the entry for `key`. Returns `true` if one existed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> StatusStore<T> {
    /// Snapshot of the status for `key`, if present.
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl<T: Terminal> StatusStore<T> {
    /// Atomically mutate the record for `key` unless it is terminal.
    ///
    /// Returns `true` if the closure ran. A missing key is not an error;
    /// a job that outlives its deleted session simply logs and moves on.
    pub fn update_active<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(key) {
            Some(entry) if !entry.is_terminal() => {
                f(entry);
                true
            }
            _ => false,
        }
    }
}
