// Partial-failure policy: a few lost segments in a long video are brief
// glitches, so the download only fails once the loss ratio is too high.

use tracing::{info, warn};

use crate::DownloadError;
use crate::hls::error::SegmentError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailurePolicy {
    /// Largest tolerated `failed / total`; exceeding it fails the download.
    pub max_loss_ratio: f64,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_loss_ratio: 0.05,
        }
    }
}

impl FailurePolicy {
    /// Decides the outcome once every segment result has been collected.
    pub fn evaluate(&self, tracker: &FailureTracker) -> Result<(), DownloadError> {
        let ratio = tracker.loss_ratio();

        match tracker.first_error() {
            Some(first) if ratio > self.max_loss_ratio => {
                warn!(
                    failed = tracker.failed(),
                    total = tracker.total(),
                    ratio,
                    threshold = self.max_loss_ratio,
                    "Segment loss exceeds the tolerated ratio"
                );
                Err(DownloadError::TooManyFailures {
                    failed: tracker.failed(),
                    total: tracker.total(),
                    threshold: self.max_loss_ratio,
                    source: first.clone(),
                })
            }
            Some(_) => {
                info!(
                    failed = tracker.failed(),
                    total = tracker.total(),
                    ratio,
                    "Tolerating lost segments"
                );
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Counts permanently failed segments and keeps the first error seen.
#[derive(Debug, Default)]
pub struct FailureTracker {
    total: usize,
    failed: usize,
    first_error: Option<SegmentError>,
}

impl FailureTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, error: SegmentError) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn first_error(&self) -> Option<&SegmentError> {
        self.first_error.as_ref()
    }

    pub fn loss_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total as f64
    }
}
