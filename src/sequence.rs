//! Per-session sequence-number allocation and the image filename convention.
//!
//! Every rendered page in a session gets a globally unique, gap-free number.
//! Because several jobs in one session convert concurrently, the allocator is
//! the single point of synchronisation in the pipeline: one mutex per
//! session, held only for the duration of an increment, so independent
//! sessions never block each other.
//!
//! ## Reserve vs. commit
//!
//! Two counters per session keep uniqueness and progress accounting apart:
//!
//! * `next` — the reservation cursor. [`SequenceAllocator::allocate`]
//!   advances it by the page count of a whole document in one atomic step,
//!   which is what makes concurrent jobs' ranges disjoint and each
//!   document's run contiguous.
//! * `committed` — the rendered-page cursor. [`SequenceAllocator::commit`]
//!   advances it one page at a time as images are persisted. The session
//!   status's `image_cursor` mirrors this value, so a document that fails
//!   mid-way advances the cursor only by the pages it actually produced.
//!
//! Numbers reserved by a document that later fails are never reissued.

use crate::config::ImageFormat;
use crate::error::Pdf2SeqError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Fixed width of the zero-padded decimal sequence number in filenames.
///
/// Seven digits caps a session at 9,999,999 images and preserves
/// lexicographic/numeric sort equivalence across the whole range.
pub const SEQUENCE_WIDTH: usize = 7;

/// Filename for the image carrying sequence number `sequence`,
/// e.g. `0000042.jpeg`.
pub fn image_filename(sequence: u64, format: ImageFormat) -> String {
    format!(
        "{sequence:0width$}.{ext}",
        width = SEQUENCE_WIDTH,
        ext = format.extension()
    )
}

#[derive(Debug)]
struct Cursor {
    /// Next number to reserve.
    next: u64,
    /// `start_number` + pages successfully rendered so far.
    committed: u64,
}

/// Atomic per-session counter handing out contiguous image numbers.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    cursors: RwLock<HashMap<String, Arc<Mutex<Cursor>>>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's cursor, starting at `start_number`.
    ///
    /// Called once at session creation; re-registering an existing session
    /// resets its cursor.
    pub fn register(&self, session_id: &str, start_number: u64) {
        self.cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                session_id.to_string(),
                Arc::new(Mutex::new(Cursor {
                    next: start_number,
                    committed: start_number,
                })),
            );
    }

    /// Drop a session's cursor. Subsequent allocations fail with
    /// `SessionNotFound`.
    pub fn remove(&self, session_id: &str) {
        self.cursors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    fn cursor_handle(&self, session_id: &str) -> Result<Arc<Mutex<Cursor>>, Pdf2SeqError> {
        self.cursors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| Pdf2SeqError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Atomically reserve `count` contiguous numbers for `session_id` and
    /// return the first of them.
    ///
    /// Concurrent callers against the same session never receive
    /// overlapping ranges; callers against different sessions never block
    /// each other.
    pub fn allocate(&self, session_id: &str, count: u64) -> Result<u64, Pdf2SeqError> {
        let handle = self.cursor_handle(session_id)?;
        let mut cursor = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let start = cursor.next;
        cursor.next += count;
        Ok(start)
    }

    /// Record `count` pages as successfully rendered and return the new
    /// committed cursor value.
    pub fn commit(&self, session_id: &str, count: u64) -> Result<u64, Pdf2SeqError> {
        let handle = self.cursor_handle(session_id)?;
        let mut cursor = handle.lock().unwrap_or_else(PoisonError::into_inner);
        cursor.committed += count;
        Ok(cursor.committed)
    }

    /// The session's committed cursor: `start_number` + pages rendered.
    pub fn cursor(&self, session_id: &str) -> Result<u64, Pdf2SeqError> {
        let handle = self.cursor_handle(session_id)?;
        let cursor = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cursor.committed)
    }
}
