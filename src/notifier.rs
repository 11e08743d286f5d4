//! Pollable status streams for sessions and jobs.
//!
//! The notifier turns the point-read status stores into a sequence of
//! snapshots a transport layer can forward verbatim (server-sent events,
//! long polling, a TUI). It is pull-driven: one store read per poll
//! interval, no listener registration anywhere else in the pipeline.
//!
//! A stream ends exactly once, after yielding the first terminal snapshot.
//! Polling a job id that was never created yields a single synthetic
//! `not_found` snapshot; polling an unknown session ends immediately with
//! no items (a session id is only ever obtained from session creation, so
//! an unknown one means it was deleted).

use crate::status::{JobStatus, JobStore, SessionStatus, SessionStore};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;

enum Poll {
    /// First poll: emit a snapshot immediately.
    Immediate,
    /// Subsequent polls: sleep one interval first.
    AfterInterval,
    /// Terminal snapshot already emitted.
    Finished,
}

/// Produces status snapshot streams until the watched entry goes terminal.
#[derive(Clone)]
pub struct StatusNotifier {
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    poll_interval: Duration,
}

impl StatusNotifier {
    pub fn new(
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            jobs,
            poll_interval,
        }
    }

    /// Snapshot stream for a session, one item per poll interval,
    /// terminating after the first `completed`/`error` snapshot or
    /// immediately if the session does not exist.
    pub fn watch_session(
        &self,
        session_id: &str,
    ) -> impl Stream<Item = SessionStatus> + Send + 'static {
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        let interval = self.poll_interval;

        stream::unfold(Poll::Immediate, move |state| {
            let sessions = Arc::clone(&sessions);
            let session_id = session_id.clone();
            async move {
                match state {
                    Poll::Finished => None,
                    Poll::Immediate | Poll::AfterInterval => {
                        if matches!(state, Poll::AfterInterval) {
                            tokio::time::sleep(interval).await;
                        }
                        let snapshot = sessions.get(&session_id)?;
                        let next = if snapshot.status.is_terminal() {
                            Poll::Finished
                        } else {
                            Poll::AfterInterval
                        };
                        Some((snapshot, next))
                    }
                }
            }
        })
    }

    /// Snapshot stream for a job, one item per poll interval, terminating
    /// after the first terminal snapshot.
    ///
    /// An unknown job id yields one synthetic terminal `not_found` snapshot
    /// and then ends — callers polling a bad id learn so on the first poll.
    pub fn watch_job(&self, job_id: &str) -> impl Stream<Item = JobStatus> + Send + 'static {
        let jobs = Arc::clone(&self.jobs);
        let job_id = job_id.to_string();
        let interval = self.poll_interval;

        stream::unfold(Poll::Immediate, move |state| {
            let jobs = Arc::clone(&jobs);
            let job_id = job_id.clone();
            async move {
                match state {
                    Poll::Finished => None,
                    Poll::Immediate | Poll::AfterInterval => {
                        if matches!(state, Poll::AfterInterval) {
                            tokio::time::sleep(interval).await;
                        }
                        let snapshot = jobs
                            .get(&job_id)
                            .unwrap_or_else(|| JobStatus::not_found(&job_id));
                        let next = if snapshot.status.is_terminal() {
                            Poll::Finished
                        } else {
                            Poll::AfterInterval
                        };
                        Some((snapshot, next))
                    }
                }
            }
        })
    }
}
