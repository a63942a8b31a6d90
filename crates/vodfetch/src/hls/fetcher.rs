// HLS Segment Fetcher: Handles the raw download of individual media segments with retry logic.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::hls::config::HlsConfig;
use crate::hls::error::{FetchError, SegmentError};
use crate::hls::playlist::Segment;
use crate::hls::retry::{RetryAction, RetryError, retry_with_backoff};

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Downloads one segment's bytes, retrying transient failures.
    async fn download_segment(
        &self,
        segment: &Segment,
        token: &CancellationToken,
    ) -> Result<Bytes, SegmentError>;
}

pub struct SegmentFetcher {
    http_client: Client,
    config: Arc<HlsConfig>,
    /// Sent with every attempt; origins check Referer/Origin on segments too
    headers: HeaderMap,
}

impl SegmentFetcher {
    pub fn new(http_client: Client, config: Arc<HlsConfig>, headers: HeaderMap) -> Self {
        Self {
            http_client,
            config,
            headers,
        }
    }

    /// One GET. Anything other than a 200 with a fully read body is retryable.
    async fn fetch_once(
        &self,
        url: &Url,
        index: usize,
        attempt: u32,
    ) -> RetryAction<Bytes, FetchError> {
        debug!(index, attempt, url = %url, "Fetching segment");
        let mut request = self.http_client.get(url.clone()).headers(self.headers.clone());
        if let Some(timeout) = self.config.fetcher_config.segment_timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return RetryAction::Fail(FetchError::Request(e.to_string()));
            }
            Err(e) => return RetryAction::Retry(FetchError::Network(Arc::new(e))),
        };

        if response.status() != StatusCode::OK {
            return RetryAction::Retry(FetchError::Status(response.status()));
        }

        match response.bytes().await {
            Ok(bytes) => RetryAction::Success(bytes),
            Err(e) => RetryAction::Retry(FetchError::Body(Arc::new(e))),
        }
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn download_segment(
        &self,
        segment: &Segment,
        token: &CancellationToken,
    ) -> Result<Bytes, SegmentError> {
        let index = segment.index;
        let url = &segment.url;
        let fetcher_config = &self.config.fetcher_config;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SegmentError::Cancelled { index }),
            result = retry_with_backoff(
                fetcher_config.max_attempts,
                fetcher_config.backoff.as_ref(),
                token,
                move |attempt| self.fetch_once(url, index, attempt),
            ) => result,
        };

        match result {
            Ok(bytes) => {
                debug!(index, bytes = bytes.len(), "Downloaded segment");
                Ok(bytes)
            }
            Err(RetryError::Failed { error, attempts }) => Err(SegmentError::Exhausted {
                index,
                attempts,
                source: error,
            }),
            Err(RetryError::Cancelled) => Err(SegmentError::Cancelled { index }),
        }
    }
}
