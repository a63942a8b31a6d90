// Main module for the HLS VOD downloader

pub mod config;
pub mod error;
pub mod fetcher;
pub mod hls_downloader;
pub mod output;
pub mod playlist;
pub mod policy;
pub mod retry;
pub mod scheduler;
pub mod variant;

// Re-exports for easier access
pub use config::HlsConfig;
pub use error::{FetchError, ManifestError, SegmentError};
pub use fetcher::{SegmentDownloader, SegmentFetcher};
pub use hls_downloader::{DownloadReport, HlsDownloader};
pub use playlist::{Playlist, Segment};
pub use policy::FailurePolicy;
pub use retry::{BackoffStrategy, ExponentialBackoff, FnBackoff, LinearBackoff, NoBackoff};
pub use variant::{Variant, VariantSelectionPolicy};
