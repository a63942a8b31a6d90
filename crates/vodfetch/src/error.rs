use std::path::PathBuf;

use crate::hls::{ManifestError, SegmentError};

// Custom error type for download operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Invalid output path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{failed} of {total} segments failed (allowed loss ratio {threshold}); first failure: {source}"
    )]
    TooManyFailures {
        failed: usize,
        total: usize,
        threshold: f64,
        #[source]
        source: SegmentError,
    },

    #[error("Segment workers stopped after {received} of {total} results")]
    Incomplete { received: usize, total: usize },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("TLS configuration error: {0}")]
    TlsError(String),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl DownloadError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DownloadError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}
