use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::DownloaderConfig;
use crate::hls::policy::FailurePolicy;
use crate::hls::retry::{BackoffStrategy, LinearBackoff};
use crate::hls::variant::VariantSelectionPolicy;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    /// Base downloader configuration
    pub base: DownloaderConfig,
    pub playlist_config: HlsPlaylistConfig,
    pub scheduler_config: HlsSchedulerConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub output_config: HlsOutputConfig,
    pub failure_policy: FailurePolicy,
}

impl HlsConfig {
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.scheduler_config.download_concurrency = workers;
        self
    }

    pub fn with_backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.fetcher_config.backoff = Arc::new(backoff);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_config.base_dir = Some(dir.into());
        self
    }

    pub fn with_max_loss_ratio(mut self, ratio: f64) -> Self {
        self.failure_policy.max_loss_ratio = ratio;
        self
    }
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPlaylistConfig {
    /// Timeout for each manifest request
    pub fetch_timeout: Duration,
    pub variant_selection_policy: VariantSelectionPolicy,
    /// How many master playlists may be followed before giving up
    pub max_master_depth: usize,
}

impl Default for HlsPlaylistConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            variant_selection_policy: VariantSelectionPolicy::default(),
            max_master_depth: 3,
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct HlsSchedulerConfig {
    /// Number of concurrent segment workers. Eight keeps throughput high
    /// without tripping CDN rate limits.
    pub download_concurrency: usize,
}

impl Default for HlsSchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 8,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    /// Attempts per segment, first try included
    pub max_attempts: u32,
    /// Per-request timeout for segments, on top of the client timeout
    pub segment_timeout: Option<Duration>,
    pub backoff: Arc<dyn BackoffStrategy>,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            segment_timeout: None,
            backoff: Arc::new(LinearBackoff::default()),
        }
    }
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct HlsOutputConfig {
    /// Directory the output file must stay inside. `None` disables confinement.
    pub base_dir: Option<PathBuf>,
    /// Unix permission bits for created parent directories
    pub dir_mode: u32,
    /// Unix permission bits for the output file
    pub file_mode: u32,
}

impl Default for HlsOutputConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            dir_mode: 0o750,
            file_mode: 0o600,
        }
    }
}
