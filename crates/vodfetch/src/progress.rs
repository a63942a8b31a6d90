//! # Progress reporting
//!
//! The assembler reports each time its write cursor advances: how many
//! segments are done (written or skipped as lost), out of how many, and how
//! many bytes the workers have fetched so far.

use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub segments_done: usize,
    pub segments_total: usize,
    pub bytes_downloaded: u64,
}

impl DownloadProgress {
    pub fn is_complete(&self) -> bool {
        self.segments_done >= self.segments_total
    }
}

/// Receives progress updates. Called from the assembler task only.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    fn on_progress(&self, progress: DownloadProgress) {
        self(progress)
    }
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: DownloadProgress) {}
}

/// Bytes fetched by the workers. The only state shared between workers.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    bytes: AtomicU64,
}

impl ProgressCounter {
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

fn segment_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Drives an `indicatif` progress bar.
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// Use an existing bar, e.g. one added to a `MultiProgress`.
    pub fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(segment_style());
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_progress(&self, progress: DownloadProgress) {
        self.bar.set_length(progress.segments_total as u64);
        self.bar.set_position(progress.segments_done as u64);
        self.bar.set_message(HumanBytes(progress.bytes_downloaded).to_string());
        if progress.is_complete() {
            self.bar.finish();
        }
    }
}
