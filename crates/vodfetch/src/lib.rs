//! # Vodfetch
//!
//! Downloads video-on-demand HLS streams into a single media file.
//!
//! ## Features
//!
//! - Master playlist resolution with configurable variant selection
//! - Concurrent segment downloads on a fixed worker pool
//! - Manifest-order reassembly regardless of completion order
//! - Per-segment retry with pluggable backoff
//! - Tolerance for a bounded fraction of lost segments
//! - Cooperative cancellation through a `CancellationToken`
//!
//! ```no_run
//! use std::collections::HashMap;
//! use tokio_util::sync::CancellationToken;
//! use vodfetch::{HlsConfig, HlsDownloader};
//!
//! # async fn run() -> Result<(), vodfetch::DownloadError> {
//! let downloader = HlsDownloader::new(HlsConfig::default())?;
//! let mut headers = HashMap::new();
//! headers.insert("Referer".to_string(), "https://example.com/".to_string());
//!
//! let report = downloader
//!     .download(
//!         &CancellationToken::new(),
//!         "https://cdn.example.com/vod/master.m3u8",
//!         "downloads/episode.ts",
//!         &headers,
//!     )
//!     .await?;
//! println!("{} bytes written", report.bytes_written);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod hls;
pub mod progress;
pub mod proxy;

pub use builder::DownloaderConfigBuilder;
pub use client::create_client;
pub use config::DownloaderConfig;
pub use error::DownloadError;
pub use hls::{DownloadReport, HlsConfig, HlsDownloader};
pub use progress::{DownloadProgress, NoProgress, ProgressBarSink, ProgressSink};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
