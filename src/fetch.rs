//! Source-document retrieval with bounded exponential backoff.
//!
//! Documents uploaded through signed URLs may take a while to become
//! visible in the remote store, so a miss right after upload is usually
//! transient. [`RetryingFetcher`] wraps any [`ObjectStore`] and retries
//! not-found/transient failures with `2^attempt`-second backoff, capped at
//! `max_retries`. Permanent failures (credentials, configuration) fail
//! immediately — retrying a bad key only delays the error report.
//!
//! The backoff schedule lives in [`RetryPolicy`], a pure value independently
//! testable without sleeping; the async tests pause tokio's clock instead.

use crate::error::Pdf2SeqError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures at the object-store boundary, classified for retry purposes.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The object does not (yet) exist. Retryable — uploads propagate with
    /// a delay.
    #[error("object not found: '{location}'")]
    NotFound { location: String },

    /// Network hiccup or backend wobble. Retryable.
    #[error("transient store failure for '{location}': {reason}")]
    Transient { location: String, reason: String },

    /// Credentials or configuration problem. Never retried.
    #[error("permanent store failure: {reason}")]
    Permanent { reason: String },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Permanent { .. })
    }
}

/// A remote or local blob store holding source documents and mirrored
/// images.
///
/// Implementations must map their native failures onto [`StoreError`]'s
/// retryability classes; everything above this trait is storage-agnostic.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Retrieve the object at `location`.
    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError>;

    /// Store `bytes` at `location`, replacing any existing object.
    async fn put(&self, location: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// List object locations under `prefix`. Used only for diagnostics on a
    /// fetch miss; stores without a listing capability may return an empty
    /// vector.
    async fn list(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

/// Exponential-backoff schedule for fetch retries.
///
/// With `max_retries = R`, a fetch performs at most `R + 1` attempts and
/// sleeps `base_delay * 2^n` before retry `n` (1-indexed) — worst case
/// `2^1 + 2^2 + … + 2^R` seconds at the default one-second base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Total number of attempts performed in the worst case.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Retrieves source documents from an [`ObjectStore`], retrying transient
/// failures per the configured [`RetryPolicy`].
pub struct RetryingFetcher {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Fetch the object at `location`, retrying with exponential backoff.
    ///
    /// # Errors
    /// * [`Pdf2SeqError::PermanentConfig`] on a non-retryable store failure,
    ///   without any retry.
    /// * [`Pdf2SeqError::FetchExhausted`] once `max_retries` retries are
    ///   spent; the error message carries the last underlying failure.
    pub async fn fetch(&self, location: &str) -> Result<Vec<u8>, Pdf2SeqError> {
        let mut attempt = 0u32;
        loop {
            match self.store.get(location).await {
                Ok(bytes) => {
                    info!(location, bytes = bytes.len(), "fetched source document");
                    return Ok(bytes);
                }
                Err(e @ StoreError::Permanent { .. }) => {
                    return Err(Pdf2SeqError::PermanentConfig {
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.policy.max_retries {
                        self.log_visible_objects(location).await;
                        return Err(Pdf2SeqError::FetchExhausted {
                            location: location.to_string(),
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    let delay = self.policy.delay(attempt);
                    warn!(
                        location,
                        attempt,
                        max_retries = self.policy.max_retries,
                        ?delay,
                        "fetch failed ({e}), retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Best-effort listing of what the store holds near `location`, to aid
    /// diagnosing a miss. Never mistaken for a successful fetch.
    async fn log_visible_objects(&self, location: &str) {
        let prefix = location.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        match self.store.list(prefix).await {
            Ok(listing) if listing.is_empty() => {
                debug!(location, prefix, "no objects visible under prefix");
            }
            Ok(listing) => {
                debug!(
                    location,
                    prefix,
                    visible = listing.len(),
                    first = listing.first().map(String::as_str),
                    "objects visible under prefix, expected one missing"
                );
            }
            Err(e) => debug!(location, "could not list store for diagnostics: {e}"),
        }
    }
}

// ── Store implementations ────────────────────────────────────────────────

/// Object store backed by a local directory; locations are relative paths.
///
/// This is the "local mode" counterpart of the remote store: uploads are
/// placed directly under `root` and images can be mirrored next to them.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(location);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                location: location.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StoreError::Permanent {
                    reason: format!("permission denied reading '{}'", path.display()),
                })
            }
            Err(e) => Err(StoreError::Transient {
                location: location.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, location: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(location);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Transient {
                    location: location.to_string(),
                    reason: e.to_string(),
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Transient {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        // Directory walking is blocking work.
        tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                let entries = match std::fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(_) => continue,
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else if let Ok(rel) = path.strip_prefix(&root) {
                        let rel = rel.to_string_lossy().replace('\\', "/");
                        if rel.starts_with(&prefix) {
                            found.push(rel);
                        }
                    }
                }
            }
            found.sort();
            Ok(found)
        })
        .await
        .unwrap_or_else(|e| {
            Err(StoreError::Transient {
                location: String::new(),
                reason: format!("list task panicked: {e}"),
            })
        })
    }
}

/// Object store speaking plain HTTP GET/PUT against a base URL.
///
/// Matches the signed-URL upload flow of the surrounding system: the
/// transport layer hands out URLs under the same base, and this store
/// fetches them back.
pub struct HttpObjectStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    /// Create a store rooted at `base_url` (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, location: &str) -> String {
        format!("{}/{}", self.base_url, location.trim_start_matches('/'))
    }

    fn classify(location: &str, status: reqwest::StatusCode) -> StoreError {
        if status == reqwest::StatusCode::NOT_FOUND {
            StoreError::NotFound {
                location: location.to_string(),
            }
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            StoreError::Permanent {
                reason: format!("HTTP {status} for '{location}'"),
            }
        } else {
            StoreError::Transient {
                location: location.to_string(),
                reason: format!("HTTP {status}"),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.url_for(location);
        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| StoreError::Transient {
                    location: location.to_string(),
                    reason: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(Self::classify(location, response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| StoreError::Transient {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, location: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let url = self.url_for(location);
        let response = self
            .client
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| StoreError::Transient {
                location: location.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Self::classify(location, response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn worst_case_sleep_is_geometric_sum() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        };
        let total: Duration = (1..=policy.max_retries).map(|a| policy.delay(a)).sum();
        assert_eq!(total, Duration::from_secs(2 + 4 + 8));
    }

    struct FlakyStore {
        failures_before_success: u32,
        calls: AtomicU32,
        payload: Vec<u8>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(StoreError::NotFound {
                    location: location.to_string(),
                })
            } else {
                Ok(self.payload.clone())
            }
        }

        async fn put(&self, _location: &str, _bytes: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct DeniedStore;

    #[async_trait]
    impl ObjectStore for DeniedStore {
        async fn get(&self, _location: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Permanent {
                reason: "bad credentials".into(),
            })
        }

        async fn put(&self, _location: &str, _bytes: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Permanent {
                reason: "bad credentials".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retries_until_object_appears() {
        let store = Arc::new(FlakyStore {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            payload: b"%PDF-1.7".to_vec(),
        });
        let fetcher = RetryingFetcher::new(Arc::clone(&store) as Arc<dyn ObjectStore>, RetryPolicy::default());

        let bytes = fetcher.fetch("s/j/doc.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_gives_up_after_max_retries() {
        let store = Arc::new(FlakyStore {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            payload: Vec::new(),
        });
        let fetcher = RetryingFetcher::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
            },
        );

        let started = tokio::time::Instant::now();
        let err = fetcher.fetch("s/j/doc.pdf").await.unwrap_err();

        assert!(matches!(
            err,
            Pdf2SeqError::FetchExhausted { attempts: 4, .. }
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        // 2 + 4 + 8 seconds of (virtual) backoff
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let fetcher = RetryingFetcher::new(Arc::new(DeniedStore), RetryPolicy::default());
        let err = fetcher.fetch("anything").await.unwrap_err();
        assert!(matches!(err, Pdf2SeqError::PermanentConfig { .. }));
    }

    #[tokio::test]
    async fn local_store_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("s1/j1/a.pdf", b"hello").await.unwrap();
        store.put("s1/j2/b.pdf", b"world").await.unwrap();

        assert_eq!(store.get("s1/j1/a.pdf").await.unwrap(), b"hello");
        assert!(matches!(
            store.get("s1/j1/missing.pdf").await,
            Err(StoreError::NotFound { .. })
        ));

        let listing = store.list("s1/").await.unwrap();
        assert_eq!(listing, vec!["s1/j1/a.pdf", "s1/j2/b.pdf"]);
    }
}
