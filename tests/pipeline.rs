//! Integration tests for the session/job conversion pipeline.
//!
//! These run fully hermetic: a fake renderer stands in for pdfium and an
//! in-memory object store stands in for the remote bucket, so no native
//! library, network, or real PDF is needed. Time-dependent paths (fetch
//! backoff) run under tokio's paused clock.

use async_trait::async_trait;
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use pdf2seq::{
    ConvertConfig, DocumentSource, JobOrchestrator, JobState, ObjectStore, PageRenderer,
    Pdf2SeqError, SequenceAllocator, SessionState, StoreError,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Test doubles ─────────────────────────────────────────────────────────

/// Renderer that fabricates pages from a per-filename page-count table.
#[derive(Default)]
struct FakeRenderer {
    /// file name → page count
    counts: HashMap<String, usize>,
    /// file name → 0-indexed page whose render fails
    fail_at: HashMap<String, usize>,
}

impl FakeRenderer {
    fn with_document(mut self, file_name: &str, pages: usize) -> Self {
        self.counts.insert(file_name.to_string(), pages);
        self
    }

    fn failing_at(mut self, file_name: &str, page_index: usize) -> Self {
        self.fail_at.insert(file_name.to_string(), page_index);
        self
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl PageRenderer for FakeRenderer {
    fn page_count(&self, path: &Path) -> Result<usize, Pdf2SeqError> {
        self.counts
            .get(&Self::file_name(path))
            .copied()
            .ok_or_else(|| Pdf2SeqError::CorruptDocument {
                path: path.to_path_buf(),
                detail: "unknown test document".into(),
            })
    }

    fn render_page(
        &self,
        path: &Path,
        page_index: usize,
        _dpi: u32,
    ) -> Result<DynamicImage, Pdf2SeqError> {
        let name = Self::file_name(path);
        if self.fail_at.get(&name) == Some(&page_index) {
            return Err(Pdf2SeqError::RenderFailed {
                page: page_index + 1,
                detail: "injected decode failure".into(),
            });
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([page_index as u8, 0, 0, 255]),
        )))
    }
}

/// Object store whose objects never appear.
struct MissingStore {
    calls: AtomicU32,
}

#[async_trait]
impl ObjectStore for MissingStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::NotFound {
            location: location.to_string(),
        })
    }

    async fn put(&self, _location: &str, _bytes: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory object store recording every mirrored image.
#[derive(Default)]
struct MemoryStore {
    objects: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                location: location.to_string(),
            })
    }

    async fn put(&self, location: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert(location.to_string(), bytes.to_vec());
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

fn test_config(root: &Path) -> ConvertConfig {
    ConvertConfig::builder()
        .dpi(150)
        .output_root(root)
        .build()
        .unwrap()
}

/// Place a dummy source document and return its path.
fn stage_document(dir: &Path, file_name: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(file_name);
    std::fs::write(&path, b"%PDF-1.7 test fixture").unwrap();
    path
}

fn image_names(images_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(images_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

// ── Scenario A: one clean 3-page document ────────────────────────────────

#[tokio::test]
async fn single_document_converts_with_numbers_from_one() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(FakeRenderer::default().with_document("a.pdf", 3));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(1));
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "a.pdf");

    let images = orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let sequences: Vec<u64> = images.iter().map(|i| i.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(
        image_names(&orchestrator_images_dir(tmp.path(), &session.session_id)),
        vec!["0000001.jpeg", "0000002.jpeg", "0000003.jpeg"]
    );

    let job_status = orchestrator.jobs().get(&job.job_id).unwrap();
    assert_eq!(job_status.status, JobState::Completed);
    assert_eq!(job_status.progress, 100.0);
    assert!(job_status.completed_at.is_some());

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Completed);
    assert_eq!(session_status.progress, 100.0);
    assert_eq!(session_status.image_cursor, 4);
}

fn orchestrator_images_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join(session_id).join("images")
}

// ── Scenario B: two concurrent documents, disjoint contiguous ranges ─────

#[tokio::test]
async fn concurrent_documents_draw_disjoint_contiguous_ranges() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(
        FakeRenderer::default()
            .with_document("a.pdf", 2)
            .with_document("b.pdf", 3),
    );
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(100));
    let job_a = orchestrator.register_job(&session.session_id).unwrap();
    let job_b = orchestrator.register_job(&session.session_id).unwrap();
    let pdf_a = stage_document(tmp.path(), "a.pdf");
    let pdf_b = stage_document(tmp.path(), "b.pdf");

    let handle_a = orchestrator
        .submit(&session.session_id, &job_a.job_id, DocumentSource::Local(pdf_a), 150)
        .unwrap();
    let handle_b = orchestrator
        .submit(&session.session_id, &job_b.job_id, DocumentSource::Local(pdf_b), 150)
        .unwrap();

    let images_a = handle_a.await.unwrap().unwrap();
    let images_b = handle_b.await.unwrap().unwrap();

    // Each document's numbers form a contiguous increasing run.
    for images in [&images_a, &images_b] {
        let first = images[0].sequence;
        for (offset, image) in images.iter().enumerate() {
            assert_eq!(image.sequence, first + offset as u64);
        }
    }

    // Exactly five distinct numbers drawn from {100..=104}.
    let all: HashSet<u64> = images_a
        .iter()
        .chain(images_b.iter())
        .map(|i| i.sequence)
        .collect();
    assert_eq!(all, (100..=104).collect::<HashSet<u64>>());

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Completed);
    assert_eq!(session_status.image_cursor, 105);
    assert_eq!(session_status.pdf_count, 2);
}

// ── Scenario C: fetch exhaustion marks session error, cursor untouched ───

#[tokio::test(start_paused = true)]
async fn fetch_exhaustion_fails_job_and_session_without_touching_cursor() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MissingStore {
        calls: AtomicU32::new(0),
    });
    let renderer = Arc::new(FakeRenderer::default());
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer)
        .with_source_store(Arc::clone(&store) as Arc<dyn ObjectStore>);

    let session = orchestrator.create_session(Some(100));
    let job = orchestrator.register_job(&session.session_id).unwrap();

    let started = tokio::time::Instant::now();
    let err = orchestrator
        .submit(
            &session.session_id,
            &job.job_id,
            DocumentSource::Remote {
                location: format!("{}/{}/scan.pdf", session.session_id, job.job_id),
            },
            150,
        )
        .unwrap()
        .await
        .unwrap()
        .unwrap_err();

    // max_retries = 3 → 4 attempts, 2 + 4 + 8 seconds of (virtual) backoff.
    assert!(matches!(err, Pdf2SeqError::FetchExhausted { attempts: 4, .. }));
    assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(14));

    let job_status = orchestrator.jobs().get(&job.job_id).unwrap();
    assert_eq!(job_status.status, JobState::Error);
    assert!(job_status.error.as_deref().unwrap().contains("document not found"));

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Error);
    assert!(session_status.message.contains("document not found"));
    assert_eq!(session_status.image_cursor, 100);
}

// ── Scenario D: mid-document render failure keeps earlier pages ──────────

#[tokio::test]
async fn render_failure_keeps_earlier_pages_and_partial_cursor() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(
        FakeRenderer::default()
            .with_document("flaky.pdf", 5)
            .failing_at("flaky.pdf", 2),
    );
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(1));
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "flaky.pdf");

    let err = orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Pdf2SeqError::RenderFailed { page: 3, .. }));

    // Pages 1–2 persisted under their numbers, page 3 onwards absent.
    assert_eq!(
        image_names(&orchestrator_images_dir(tmp.path(), &session.session_id)),
        vec!["0000001.jpeg", "0000002.jpeg"]
    );

    let job_status = orchestrator.jobs().get(&job.job_id).unwrap();
    assert_eq!(job_status.status, JobState::Error);
    assert!(job_status.error.as_deref().unwrap().contains("page 3"));

    // Cursor advanced by exactly the two rendered pages, not by five.
    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Error);
    assert_eq!(session_status.image_cursor, 3);
}

// ── Scenario E is covered by notifier unit tests; here: live polling ─────

#[tokio::test(start_paused = true)]
async fn notifier_follows_job_from_pending_to_completed() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(FakeRenderer::default().with_document("a.pdf", 2));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(None);
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "a.pdf");
    let notifier = orchestrator.notifier();
    let watch = tokio::spawn(
        notifier
            .watch_job(&job.job_id)
            .collect::<Vec<pdf2seq::JobStatus>>(),
    );

    orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let snapshots = watch.await.unwrap();
    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobState::Completed);
    assert_eq!(last.progress, 100.0);
}

// ── Mixed outcomes: one job fails, session still completes ───────────────

#[tokio::test]
async fn session_completes_when_some_but_not_all_jobs_fail() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(
        FakeRenderer::default()
            .with_document("good.pdf", 2)
            .with_document("bad.pdf", 3)
            .failing_at("bad.pdf", 0),
    );
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(1));
    let good = orchestrator.register_job(&session.session_id).unwrap();
    let bad = orchestrator.register_job(&session.session_id).unwrap();
    let good_pdf = stage_document(tmp.path(), "good.pdf");
    let bad_pdf = stage_document(tmp.path(), "bad.pdf");

    let good_handle = orchestrator
        .submit(&session.session_id, &good.job_id, DocumentSource::Local(good_pdf), 150)
        .unwrap();
    let bad_handle = orchestrator
        .submit(&session.session_id, &bad.job_id, DocumentSource::Local(bad_pdf), 150)
        .unwrap();

    good_handle.await.unwrap().unwrap();
    bad_handle.await.unwrap().unwrap_err();

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Completed);
    assert!(session_status.message.contains("1 failed"));

    // Per-job error detail survives the session going terminal.
    let bad_status = orchestrator.jobs().get(&bad.job_id).unwrap();
    assert_eq!(bad_status.status, JobState::Error);
    assert!(bad_status.error.is_some());
}

// ── Zero-page documents are a no-op success ──────────────────────────────

#[tokio::test]
async fn zero_page_document_completes_without_consuming_numbers() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(FakeRenderer::default().with_document("empty.pdf", 0));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(7));
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "empty.pdf");

    let images = orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    assert!(images.is_empty());
    let job_status = orchestrator.jobs().get(&job.job_id).unwrap();
    assert_eq!(job_status.status, JobState::Completed);
    assert_eq!(job_status.progress, 100.0);

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.status, SessionState::Completed);
    assert_eq!(session_status.image_cursor, 7);
}

// ── Uniqueness under load (P1/P3) ────────────────────────────────────────

#[tokio::test]
async fn many_concurrent_jobs_never_share_a_number() {
    let tmp = TempDir::new().unwrap();
    let mut renderer = FakeRenderer::default();
    for i in 0..8 {
        renderer = renderer.with_document(&format!("doc{i}.pdf"), 4);
    }
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), Arc::new(renderer));

    let session = orchestrator.create_session(Some(1));
    let mut handles = Vec::new();
    for i in 0..8 {
        let job = orchestrator.register_job(&session.session_id).unwrap();
        let pdf = stage_document(tmp.path(), &format!("doc{i}.pdf"));
        handles.push(
            orchestrator
                .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
                .unwrap(),
        );
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for image in handle.await.unwrap().unwrap() {
            assert!(seen.insert(image.sequence), "duplicate {}", image.sequence);
        }
    }
    assert_eq!(seen.len(), 32);
    assert_eq!(seen.iter().min(), Some(&1));
    assert_eq!(seen.iter().max(), Some(&32));

    let session_status = orchestrator.sessions().get(&session.session_id).unwrap();
    assert_eq!(session_status.image_cursor, 33);
}

// ── Terminal idempotence (P4) ────────────────────────────────────────────

#[tokio::test]
async fn terminal_statuses_stay_fixed_until_explicit_override() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(FakeRenderer::default().with_document("a.pdf", 1));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(None);
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "a.pdf");
    orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let first = orchestrator.jobs().get(&job.job_id).unwrap();
    assert_eq!(first.status, JobState::Completed);
    for _ in 0..3 {
        assert_eq!(orchestrator.jobs().get(&job.job_id).unwrap(), first);
    }

    // Guarded updates bounce off a terminal record…
    assert!(!orchestrator.jobs().update_active(&job.job_id, |j| j.progress = 0.0));
    // …but an explicit put overrides.
    let mut overridden = first.clone();
    overridden.status = JobState::Pending;
    orchestrator.jobs().put(&job.job_id, overridden);
    assert_eq!(
        orchestrator.jobs().get(&job.job_id).unwrap().status,
        JobState::Pending
    );
}

// ── Mirroring is best-effort and keyed by bare filename ──────────────────

#[tokio::test]
async fn rendered_images_are_mirrored_under_their_filenames() {
    let tmp = TempDir::new().unwrap();
    let mirror = Arc::new(MemoryStore::default());
    let renderer = Arc::new(FakeRenderer::default().with_document("a.pdf", 2));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer)
        .with_mirror_store(Arc::clone(&mirror) as Arc<dyn ObjectStore>);

    let session = orchestrator.create_session(Some(41));
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "a.pdf");
    orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap()
        .await
        .unwrap()
        .unwrap();

    let objects = mirror.objects.lock().unwrap();
    let mut keys: Vec<&String> = objects.keys().collect();
    keys.sort();
    assert_eq!(keys, ["0000041.jpeg", "0000042.jpeg"]);
}

// ── Deleted session: in-flight job still completes (no panic) ────────────

#[tokio::test]
async fn job_survives_session_deletion_mid_flight() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(FakeRenderer::default().with_document("a.pdf", 3));
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);

    let session = orchestrator.create_session(Some(1));
    let job = orchestrator.register_job(&session.session_id).unwrap();
    let pdf = stage_document(tmp.path(), "a.pdf");

    let handle = orchestrator
        .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
        .unwrap();
    orchestrator.delete_session(&session.session_id);

    // Whichever way the race goes, the job must land in a terminal state.
    let _ = handle.await.unwrap();
    let job_status = orchestrator.jobs().get(&job.job_id).unwrap();
    assert!(job_status.status.is_terminal());
    assert!(orchestrator.sessions().get(&session.session_id).is_none());
}

// ── Registration errors ──────────────────────────────────────────────────

#[tokio::test]
async fn registering_against_unknown_session_fails() {
    let tmp = TempDir::new().unwrap();
    let orchestrator =
        JobOrchestrator::new(test_config(tmp.path()), Arc::new(FakeRenderer::default()));
    assert!(matches!(
        orchestrator.register_job("ghost"),
        Err(Pdf2SeqError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn submitting_remote_source_without_store_fails_the_job() {
    let tmp = TempDir::new().unwrap();
    let orchestrator =
        JobOrchestrator::new(test_config(tmp.path()), Arc::new(FakeRenderer::default()));

    let session = orchestrator.create_session(None);
    let job = orchestrator.register_job(&session.session_id).unwrap();

    let err = orchestrator
        .submit(
            &session.session_id,
            &job.job_id,
            DocumentSource::Remote {
                location: "s/j/doc.pdf".into(),
            },
            150,
        )
        .unwrap()
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, Pdf2SeqError::NoSourceStore { .. }));
    assert_eq!(
        orchestrator.jobs().get(&job.job_id).unwrap().status,
        JobState::Error
    );
}

// ── Cursor accounting across mixed operations (P3) ───────────────────────

#[tokio::test]
async fn cursor_always_equals_start_plus_rendered_pages() {
    let tmp = TempDir::new().unwrap();
    let renderer = Arc::new(
        FakeRenderer::default()
            .with_document("one.pdf", 2)
            .with_document("two.pdf", 4)
            .failing_at("two.pdf", 1)
            .with_document("three.pdf", 3),
    );
    let orchestrator = JobOrchestrator::new(test_config(tmp.path()), renderer);
    let allocator: Arc<SequenceAllocator> = orchestrator.allocator();

    let session = orchestrator.create_session(Some(10));

    for name in ["one.pdf", "two.pdf", "three.pdf"] {
        let job = orchestrator.register_job(&session.session_id).unwrap();
        let pdf = stage_document(tmp.path(), name);
        let _ = orchestrator
            .submit(&session.session_id, &job.job_id, DocumentSource::Local(pdf), 150)
            .unwrap()
            .await
            .unwrap();
    }

    // 2 + 1 + 3 pages rendered; start was 10.
    assert_eq!(allocator.cursor(&session.session_id).unwrap(), 10 + 6);
}
