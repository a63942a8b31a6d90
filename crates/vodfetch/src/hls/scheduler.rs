// HLS Segment Scheduler: a fixed pool of workers draining a shared job queue.
//
// Results are sent in completion order; putting them back in manifest order
// is the assembler's job.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::hls::config::HlsConfig;
use crate::hls::error::SegmentError;
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::playlist::Segment;
use crate::progress::ProgressCounter;

#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment: Segment,
}

impl SegmentJob {
    pub fn index(&self) -> usize {
        self.segment.index
    }
}

/// The final outcome of one segment, after all retries.
#[derive(Debug)]
pub struct JobResult {
    pub index: usize,
    pub outcome: Result<Bytes, SegmentError>,
}

/// Handle to a running pool. Dropping it aborts any worker still running.
pub struct ScheduledDownload {
    results: mpsc::Receiver<JobResult>,
    workers: JoinSet<()>,
}

impl ScheduledDownload {
    /// The receiving end of the result channel. Closes once every worker exits.
    pub fn results(&mut self) -> &mut mpsc::Receiver<JobResult> {
        &mut self.results
    }

    /// Waits for every worker to exit, leaving unread results in the channel.
    pub async fn wait_for_workers(&mut self) {
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!(error = %e, "Segment worker panicked");
                }
            }
        }
    }

    /// Stops accepting results and waits for every worker to exit.
    pub async fn join(mut self) {
        self.results.close();
        self.wait_for_workers().await;
    }
}

type JobQueue = Arc<Mutex<VecDeque<SegmentJob>>>;

pub struct SegmentScheduler {
    config: Arc<HlsConfig>,
    downloader: Arc<dyn SegmentDownloader>,
    counter: Arc<ProgressCounter>,
}

impl SegmentScheduler {
    pub fn new(
        config: Arc<HlsConfig>,
        downloader: Arc<dyn SegmentDownloader>,
        counter: Arc<ProgressCounter>,
    ) -> Self {
        Self {
            config,
            downloader,
            counter,
        }
    }

    /// Number of workers for a playlist of `total` segments.
    fn worker_count(&self, total: usize) -> usize {
        self.config
            .scheduler_config
            .download_concurrency
            .max(1)
            .min(total.max(1))
    }

    /// Queues every segment and starts the workers.
    ///
    /// The result channel holds one slot per segment, so a worker never
    /// blocks on a slow consumer.
    pub fn spawn(&self, segments: Vec<Segment>, token: CancellationToken) -> ScheduledDownload {
        let total = segments.len();
        let (results_tx, results_rx) = mpsc::channel(total.max(1));
        let queue: JobQueue = Arc::new(Mutex::new(
            segments
                .into_iter()
                .map(|segment| SegmentJob { segment })
                .collect(),
        ));

        let worker_count = self.worker_count(total);
        debug!(total, workers = worker_count, "Starting segment workers");

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&self.downloader),
                results_tx.clone(),
                Arc::clone(&self.counter),
                token.clone(),
            ));
        }

        ScheduledDownload {
            results: results_rx,
            workers,
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: JobQueue,
    downloader: Arc<dyn SegmentDownloader>,
    results_tx: mpsc::Sender<JobResult>,
    counter: Arc<ProgressCounter>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            trace!(worker_id, "Worker stopping on cancellation");
            break;
        }

        let Some(job) = queue.lock().pop_front() else {
            trace!(worker_id, "Job queue drained");
            break;
        };
        let index = job.index();

        let outcome = downloader.download_segment(&job.segment, &token).await;
        match &outcome {
            Ok(bytes) => counter.add_bytes(bytes.len() as u64),
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                warn!(index, url = %job.segment.url, error = %e, "Segment failed permanently")
            }
        }

        if results_tx.send(JobResult { index, outcome }).await.is_err() {
            // Receiver gone, nobody is waiting for more results
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::error::FetchError;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    /// Serves `index` as its payload after a delay that varies by index, so
    /// completions arrive out of order. Indices in `failing` always fail.
    #[derive(Default)]
    struct MockDownloader {
        failing: HashSet<usize>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SegmentDownloader for MockDownloader {
        async fn download_segment(
            &self,
            segment: &Segment,
            token: &CancellationToken,
        ) -> Result<Bytes, SegmentError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = Duration::from_millis(((segment.index * 7) % 5) as u64 * 3);
            let cancelled = tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            self.active.fetch_sub(1, Ordering::SeqCst);

            if cancelled {
                return Err(SegmentError::Cancelled {
                    index: segment.index,
                });
            }
            if self.failing.contains(&segment.index) {
                return Err(SegmentError::Exhausted {
                    index: segment.index,
                    attempts: 5,
                    source: FetchError::Status(StatusCode::SERVICE_UNAVAILABLE),
                });
            }
            Ok(Bytes::from(format!("seg{:03}", segment.index)))
        }
    }

    fn segments(n: usize) -> Vec<Segment> {
        (0..n)
            .map(|index| Segment {
                url: Url::parse(&format!("http://localhost/seg{index}.ts")).unwrap(),
                index,
                duration: 4.0,
                title: None,
            })
            .collect()
    }

    fn scheduler(
        concurrency: usize,
        downloader: Arc<MockDownloader>,
    ) -> (SegmentScheduler, Arc<ProgressCounter>) {
        let config = Arc::new(HlsConfig::default().with_concurrency(concurrency));
        let counter = Arc::new(ProgressCounter::default());
        (
            SegmentScheduler::new(config, downloader, Arc::clone(&counter)),
            counter,
        )
    }

    async fn collect(download: &mut ScheduledDownload) -> Vec<JobResult> {
        let mut results = Vec::new();
        while let Some(result) = download.results().recv().await {
            results.push(result);
        }
        results
    }

    #[tokio::test]
    async fn every_segment_reported_exactly_once() {
        let downloader = Arc::new(MockDownloader::default());
        let (scheduler, counter) = scheduler(4, Arc::clone(&downloader));

        let mut download = scheduler.spawn(segments(25), CancellationToken::new());
        let results = collect(&mut download).await;
        download.join().await;

        let mut indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..25).collect::<Vec<_>>());
        assert!(results.iter().all(|r| r.outcome.is_ok()));
        assert_eq!(counter.bytes(), 25 * 6);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let downloader = Arc::new(MockDownloader::default());
        let (scheduler, _) = scheduler(3, Arc::clone(&downloader));

        let mut download = scheduler.spawn(segments(30), CancellationToken::new());
        collect(&mut download).await;
        download.join().await;

        let peak = downloader.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn failures_are_reported_not_dropped() {
        let downloader = Arc::new(MockDownloader {
            failing: HashSet::from([2, 5]),
            ..Default::default()
        });
        let (scheduler, _) = scheduler(8, downloader);

        let mut download = scheduler.spawn(segments(10), CancellationToken::new());
        let results = collect(&mut download).await;

        assert_eq!(results.len(), 10);
        let mut failed: Vec<usize> = results
            .iter()
            .filter(|r| r.outcome.is_err())
            .map(|r| r.index)
            .collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![2, 5]);
    }

    #[tokio::test]
    async fn workers_finish_without_a_reader() {
        let downloader = Arc::new(MockDownloader::default());
        let (scheduler, _) = scheduler(4, downloader);

        let mut download = scheduler.spawn(segments(40), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), download.wait_for_workers())
            .await
            .expect("workers blocked on an unread result channel");

        let results = collect(&mut download).await;
        assert_eq!(results.len(), 40);
    }

    #[tokio::test]
    async fn cancelled_token_stops_all_workers() {
        let downloader = Arc::new(MockDownloader::default());
        let (scheduler, counter) = scheduler(4, Arc::clone(&downloader));
        let token = CancellationToken::new();
        token.cancel();

        let mut download = scheduler.spawn(segments(50), token);
        let results = collect(&mut download).await;

        assert!(results.is_empty());
        assert_eq!(counter.bytes(), 0);
    }

    #[test]
    fn worker_count_never_exceeds_segments() {
        let (pool, _) = scheduler(8, Arc::new(MockDownloader::default()));
        assert_eq!(pool.worker_count(3), 3);
        assert_eq!(pool.worker_count(100), 8);
        assert_eq!(pool.worker_count(0), 1);

        let (single, _) = scheduler(0, Arc::new(MockDownloader::default()));
        assert_eq!(single.worker_count(10), 1);
    }
}
