use std::sync::Arc;

use reqwest::StatusCode;

/// Failure to obtain a usable media playlist. Always fatal to the download.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ManifestError {
    #[error("Invalid playlist URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to fetch playlist {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("Failed to fetch playlist {url}: HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("Playlist {url} is not valid UTF-8")]
    Encoding { url: String },
    #[error("Failed to parse playlist {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("no suitable stream found in master playlist {url}")]
    NoSuitableStream { url: String },
    #[error("Media playlist {url} contains no segments")]
    NoSegments { url: String },
    #[error("Master playlist nesting exceeded {depth} levels at {url}")]
    TooManyRedirections { url: String, depth: usize },
}

impl ManifestError {
    pub(crate) fn network(url: impl Into<String>, err: reqwest::Error) -> Self {
        ManifestError::Network {
            url: url.into(),
            source: Arc::new(err),
        }
    }
}

/// Why a single attempt at a segment failed.
#[derive(Debug, thiserror::Error, Clone)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("failed to read response body: {0}")]
    Body(Arc<reqwest::Error>),
    #[error("invalid request: {0}")]
    Request(String),
}

/// A segment that could not be downloaded.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SegmentError {
    #[error("segment {index} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("segment {index} cancelled")]
    Cancelled { index: usize },
}

impl SegmentError {
    pub fn index(&self) -> usize {
        match self {
            SegmentError::Exhausted { index, .. } | SegmentError::Cancelled { index } => *index,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SegmentError::Cancelled { .. })
    }
}
