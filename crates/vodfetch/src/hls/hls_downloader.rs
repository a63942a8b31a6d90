use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::DownloadError;
use crate::client::{create_client, request_headers};
use crate::hls::HlsConfig;
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::output::{OrderedAssembler, create_output_file, resolve_output_path};
use crate::hls::playlist::ManifestFetcher;
use crate::hls::scheduler::SegmentScheduler;
use crate::progress::{NoProgress, ProgressCounter, ProgressSink};

/// Summary of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    /// The media playlist actually downloaded, after following any master
    pub playlist_url: Url,
    pub segments_total: usize,
    pub segments_written: usize,
    pub segments_failed: usize,
    pub bytes_written: u64,
    /// Sum of the segment durations announced by the playlist
    pub media_duration_secs: f64,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.segments_failed == 0
    }
}

/// Downloads a VOD HLS stream into a single file.
pub struct HlsDownloader {
    client: Client,
    config: Arc<HlsConfig>,
}

impl HlsDownloader {
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config.base)?;
        Ok(Self::with_client(client, config))
    }

    /// Use an already configured client, e.g. one shared with other downloaders.
    pub fn with_client(client: Client, config: HlsConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn download(
        &self,
        token: &CancellationToken,
        url: &str,
        output_path: impl AsRef<Path>,
        headers: &HashMap<String, String>,
    ) -> Result<DownloadReport, DownloadError> {
        self.download_with_progress(token, url, output_path, headers, &NoProgress)
            .await
    }

    /// Like [`download`](Self::download), reporting to `progress` each time
    /// the write cursor advances.
    ///
    /// On error the partially written file is left in place.
    pub async fn download_with_progress(
        &self,
        token: &CancellationToken,
        url: &str,
        output_path: impl AsRef<Path>,
        headers: &HashMap<String, String>,
        progress: &dyn ProgressSink,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let output_config = &self.config.output_config;

        // Validate before touching the network
        let path = resolve_output_path(output_path.as_ref(), output_config.base_dir.as_deref())?;
        let headers = request_headers(headers, &self.config.base.user_agent)?;

        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let playlist = ManifestFetcher::new(self.client.clone(), Arc::clone(&self.config))
            .fetch(url, &headers, token)
            .await?;
        let total = playlist.segments.len();

        info!(
            url = %playlist.url,
            segments = total,
            path = %path.display(),
            workers = self.config.scheduler_config.download_concurrency,
            "Starting HLS download"
        );

        let file = create_output_file(&path, output_config).await?;

        // Workers stop as soon as this call returns, on any path
        let worker_token = token.child_token();
        let _worker_guard = worker_token.clone().drop_guard();

        let counter = Arc::new(ProgressCounter::default());
        let downloader: Arc<dyn SegmentDownloader> = Arc::new(SegmentFetcher::new(
            self.client.clone(),
            Arc::clone(&self.config),
            headers,
        ));
        let scheduler =
            SegmentScheduler::new(Arc::clone(&self.config), downloader, Arc::clone(&counter));
        let mut scheduled = scheduler.spawn(playlist.segments.clone(), worker_token);

        let mut assembler = OrderedAssembler::new(BufWriter::new(file), &path, total);
        let outcome = assembler
            .run(scheduled.results(), token, &counter, progress)
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_cancelled() {
                    warn!(
                        path = %path.display(),
                        next_index = assembler.next_index(),
                        "Download cancelled, partial file left on disk"
                    );
                } else {
                    error!(path = %path.display(), error = %e, "Assembly failed");
                }
                return Err(e);
            }
        };
        scheduled.join().await;

        self.config.failure_policy.evaluate(&outcome.failures)?;

        let report = DownloadReport {
            output_path: path,
            playlist_url: playlist.url.clone(),
            segments_total: total,
            segments_written: outcome.segments_written,
            segments_failed: outcome.failures.failed(),
            bytes_written: outcome.bytes_written,
            media_duration_secs: playlist.total_duration(),
            elapsed: started.elapsed(),
        };

        info!(
            path = %report.output_path.display(),
            segments = report.segments_written,
            failed = report.segments_failed,
            bytes = report.bytes_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "HLS download finished"
        );
        debug!(fetched_bytes = counter.bytes(), "Worker byte count");

        Ok(report)
    }
}
