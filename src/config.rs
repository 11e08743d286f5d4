//! Configuration for the conversion pipeline.
//!
//! All pipeline behaviour is controlled through [`ConvertConfig`], built via
//! its [`ConvertConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across tasks, serialise them for logging, and
//! diff two runs to understand why their outputs differ.

use crate::error::Pdf2SeqError;
use crate::fetch::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output image format for rendered pages.
///
/// The surrounding system consumes JPEG; PNG exists for callers that need
/// lossless output (e.g. archival pipelines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG output (default).
    #[default]
    Jpeg,
    /// Lossless PNG output.
    Png,
}

impl ImageFormat {
    /// File extension used for image filenames.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

/// Configuration for a conversion pipeline instance.
///
/// Built via [`ConvertConfig::builder()`] or [`ConvertConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2seq::ConvertConfig;
///
/// let config = ConvertConfig::builder()
///     .dpi(200)
///     .max_retries(5)
///     .output_root("/tmp/pdf2seq")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    ///
    /// 300 DPI matches print resolution and is the sweet spot for documents
    /// that will be re-OCRed or viewed at full size downstream. Lower it to
    /// 150 when output size matters more than fidelity.
    pub dpi: u32,

    /// Output image format. Default: [`ImageFormat::Jpeg`].
    pub format: ImageFormat,

    /// Maximum retry attempts when fetching a source document from the
    /// remote store. Default: 3.
    ///
    /// A document uploaded through a signed URL may not be visible in the
    /// store immediately. With `max_retries = R` the fetcher performs at
    /// most `R + 1` attempts, sleeping `2^attempt` seconds between them.
    pub max_retries: u32,

    /// Base unit of the exponential fetch backoff. Default: 1 second.
    ///
    /// The delay before retry `n` (1-indexed) is `retry_base_delay * 2^n`.
    /// Tests shrink this (or pause tokio's clock) to avoid real sleeps.
    pub retry_base_delay: Duration,

    /// Interval between status snapshots emitted by the notifier. Default: 1 second.
    pub poll_interval: Duration,

    /// Root directory for per-session output. Default: `"local_storage"`.
    ///
    /// Rendered images land in `<output_root>/<session_id>/images/`, fetched
    /// source documents in `<output_root>/<session_id>/<job_id>/`.
    pub output_root: PathBuf,

    /// Sequence number assigned to the first rendered image of a session
    /// when the caller does not supply one. Default: 1.
    pub default_start_number: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            format: ImageFormat::Jpeg,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            output_root: PathBuf::from("local_storage"),
            default_start_number: 1,
        }
    }
}

impl ConvertConfig {
    /// Create a new builder for `ConvertConfig`.
    pub fn builder() -> ConvertConfigBuilder {
        ConvertConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding everything belonging to one session.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.output_root.join(session_id)
    }

    /// Directory where rendered images for a session are persisted.
    pub fn images_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("images")
    }

    /// Directory where a job's fetched source documents are staged.
    pub fn job_dir(&self, session_id: &str, job_id: &str) -> PathBuf {
        self.session_dir(session_id).join(job_id)
    }

    /// Retry policy derived from `max_retries` and `retry_base_delay`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}

/// Builder for [`ConvertConfig`].
#[derive(Debug)]
pub struct ConvertConfigBuilder {
    config: ConvertConfig,
}

impl ConvertConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn format(mut self, format: ImageFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_base_delay(mut self, d: Duration) -> Self {
        self.config.retry_base_delay = d;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.config.poll_interval = d;
        self
    }

    pub fn output_root(mut self, root: impl AsRef<Path>) -> Self {
        self.config.output_root = root.as_ref().to_path_buf();
        self
    }

    pub fn default_start_number(mut self, n: u64) -> Self {
        self.config.default_start_number = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConvertConfig, Pdf2SeqError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(Pdf2SeqError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.default_start_number == 0 {
            return Err(Pdf2SeqError::InvalidConfig(
                "start number must be ≥ 1".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(Pdf2SeqError::InvalidConfig(
                "poll interval must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}
