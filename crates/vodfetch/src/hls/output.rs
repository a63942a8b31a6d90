// HLS Output: writes segment results to a single file in manifest order,
// whatever order they complete in.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::DownloadError;
use crate::hls::config::HlsOutputConfig;
use crate::hls::policy::FailureTracker;
use crate::hls::scheduler::JobResult;
use crate::progress::{DownloadProgress, ProgressCounter, ProgressSink};

/// What the assembler did once every result was in.
#[derive(Debug)]
pub struct AssemblyOutcome {
    pub segments_written: usize,
    pub bytes_written: u64,
    pub failures: FailureTracker,
}

/// Buffers out-of-order results and writes them as soon as the next
/// expected index is available. A failed segment is recorded as `None` and
/// skipped, so later segments are never held back by it.
pub struct OrderedAssembler<W> {
    writer: W,
    /// Used in error reports only
    path: PathBuf,
    total: usize,
    next_index: usize,
    pending: BTreeMap<usize, Option<Bytes>>,
    segments_written: usize,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> OrderedAssembler<W> {
    pub fn new(writer: W, path: impl Into<PathBuf>, total: usize) -> Self {
        Self {
            writer,
            path: path.into(),
            total,
            next_index: 0,
            pending: BTreeMap::new(),
            segments_written: 0,
            bytes_written: 0,
        }
    }

    /// Index of the next segment to be written.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Results received but waiting on an earlier segment.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Consumes results until every index `0..total` has been accounted for.
    pub async fn run(
        &mut self,
        results: &mut mpsc::Receiver<JobResult>,
        token: &CancellationToken,
        counter: &ProgressCounter,
        sink: &dyn ProgressSink,
    ) -> Result<AssemblyOutcome, DownloadError> {
        let mut failures = FailureTracker::new(self.total);
        let mut received = 0;

        while self.next_index < self.total {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                result = results.recv() => result,
            };

            let Some(JobResult { index, outcome }) = result else {
                if token.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                return Err(DownloadError::Incomplete {
                    received,
                    total: self.total,
                });
            };

            let stale = index < self.next_index || self.pending.contains_key(&index);
            if index >= self.total || stale {
                warn!(index, "Ignoring unexpected or duplicate segment result");
                continue;
            }
            received += 1;

            let data = match outcome {
                Ok(bytes) => Some(bytes),
                Err(e) if e.is_cancelled() => return Err(DownloadError::Cancelled),
                Err(e) => {
                    failures.record(e);
                    None
                }
            };

            let before = self.next_index;
            self.pending.insert(index, data);
            self.flush_ready().await?;

            if self.next_index > before {
                sink.on_progress(DownloadProgress {
                    segments_done: self.next_index,
                    segments_total: self.total,
                    bytes_downloaded: counter.bytes(),
                });
            }
        }

        self.writer
            .flush()
            .await
            .map_err(|e| DownloadError::write(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            segments = self.segments_written,
            bytes = self.bytes_written,
            "Assembly finished"
        );

        Ok(AssemblyOutcome {
            segments_written: self.segments_written,
            bytes_written: self.bytes_written,
            failures,
        })
    }

    /// Writes every contiguous buffered entry starting at `next_index`.
    async fn flush_ready(&mut self) -> Result<(), DownloadError> {
        while let Some(entry) = self.pending.remove(&self.next_index) {
            match entry {
                Some(bytes) => {
                    self.writer
                        .write_all(&bytes)
                        .await
                        .map_err(|e| DownloadError::write(&self.path, e))?;
                    self.bytes_written += bytes.len() as u64;
                    self.segments_written += 1;
                    trace!(index = self.next_index, len = bytes.len(), "Segment written");
                }
                None => trace!(index = self.next_index, "Skipping lost segment"),
            }
            self.next_index += 1;
        }
        Ok(())
    }
}

/// Validates the requested output path and returns it absolute and cleaned.
///
/// `.` and `..` are resolved lexically; symlinks are not followed. With a
/// `base_dir`, the result must lie strictly inside it.
pub fn resolve_output_path(
    path: &Path,
    base_dir: Option<&Path>,
) -> Result<PathBuf, DownloadError> {
    if path.as_os_str().is_empty() {
        return Err(DownloadError::invalid_path(path, "path is empty"));
    }
    if path.as_os_str().as_encoded_bytes().last() == Some(&b'/') {
        return Err(DownloadError::invalid_path(path, "path names a directory"));
    }

    let resolved = clean_path(&absolute(path)?);
    if resolved.file_name().is_none() {
        return Err(DownloadError::invalid_path(path, "path does not name a file"));
    }
    if resolved.is_dir() {
        return Err(DownloadError::invalid_path(path, "path is an existing directory"));
    }

    if let Some(base) = base_dir {
        let base = clean_path(&absolute(base)?);
        if resolved == base || !resolved.starts_with(&base) {
            return Err(DownloadError::invalid_path(
                path,
                format!("path escapes base directory {}", base.display()),
            ));
        }
    }

    Ok(resolved)
}

fn absolute(path: &Path) -> Result<PathBuf, DownloadError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| {
            DownloadError::invalid_path(path, format!("cannot resolve working directory: {e}"))
        })
}

/// Resolves `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if cleaned.file_name().is_some() {
                    cleaned.pop();
                }
            }
            Component::Normal(part) => cleaned.push(part),
        }
    }
    cleaned
}

/// Creates missing parent directories and the output file, truncating any
/// existing file.
pub async fn create_output_file(
    path: &Path,
    config: &HlsOutputConfig,
) -> Result<File, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut dirs = DirBuilder::new();
        dirs.recursive(true);
        #[cfg(unix)]
        dirs.mode(config.dir_mode);
        dirs.create(parent)
            .await
            .map_err(|e| DownloadError::write(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(config.file_mode);

    let file = options
        .open(path)
        .await
        .map_err(|e| DownloadError::write(path, e))?;
    debug!(path = %path.display(), "Output file created");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::error::{FetchError, SegmentError};
    use crate::progress::NoProgress;
    use proptest::prelude::*;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn payload(index: usize) -> Bytes {
        Bytes::from(format!("<{index}>"))
    }

    fn ok(index: usize) -> JobResult {
        JobResult {
            index,
            outcome: Ok(payload(index)),
        }
    }

    fn failed(index: usize) -> JobResult {
        JobResult {
            index,
            outcome: Err(SegmentError::Exhausted {
                index,
                attempts: 5,
                source: FetchError::Status(StatusCode::NOT_FOUND),
            }),
        }
    }

    fn expected_output(total: usize, lost: &HashSet<usize>) -> Vec<u8> {
        (0..total)
            .filter(|i| !lost.contains(i))
            .flat_map(|i| payload(i).to_vec())
            .collect()
    }

    async fn assemble(
        total: usize,
        results: Vec<JobResult>,
    ) -> (Result<AssemblyOutcome, DownloadError>, Vec<u8>) {
        let (tx, mut rx) = mpsc::channel(results.len().max(1));
        for result in results {
            tx.try_send(result).unwrap();
        }
        drop(tx);

        let mut assembler = OrderedAssembler::new(Vec::new(), "memory", total);
        let outcome = assembler
            .run(
                &mut rx,
                &CancellationToken::new(),
                &ProgressCounter::default(),
                &NoProgress,
            )
            .await;
        (outcome, assembler.into_inner())
    }

    #[tokio::test]
    async fn out_of_order_results_are_written_in_order() {
        let results = vec![ok(3), ok(1), ok(4), ok(0), ok(2)];
        let (outcome, written) = assemble(5, results).await;

        let outcome = outcome.unwrap();
        assert_eq!(written, b"<0><1><2><3><4>");
        assert_eq!(outcome.segments_written, 5);
        assert_eq!(outcome.bytes_written, 15);
        assert_eq!(outcome.failures.failed(), 0);
    }

    #[tokio::test]
    async fn lost_segment_does_not_block_later_ones() {
        let results = vec![ok(2), failed(1), ok(0), ok(3)];
        let (outcome, written) = assemble(4, results).await;

        let outcome = outcome.unwrap();
        assert_eq!(written, b"<0><2><3>");
        assert_eq!(outcome.segments_written, 3);
        assert_eq!(outcome.failures.failed(), 1);
        assert_eq!(outcome.failures.first_error().unwrap().index(), 1);
    }

    #[tokio::test]
    async fn first_error_follows_arrival_order() {
        let results = vec![failed(7), ok(0), failed(2)];
        let mut all = results;
        all.extend((1..10).filter(|i| *i != 2 && *i != 7).map(ok));
        let (outcome, _) = assemble(10, all).await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.failures.failed(), 2);
        assert_eq!(outcome.failures.first_error().unwrap().index(), 7);
    }

    #[tokio::test]
    async fn duplicates_are_ignored() {
        let results = vec![ok(1), ok(1), ok(0), ok(0), ok(2)];
        let (outcome, written) = assemble(3, results).await;

        assert_eq!(outcome.unwrap().segments_written, 3);
        assert_eq!(written, b"<0><1><2>");
    }

    #[tokio::test]
    async fn closed_channel_before_completion_is_an_error() {
        let (outcome, written) = assemble(3, vec![ok(0), ok(2)]).await;

        assert!(matches!(
            outcome,
            Err(DownloadError::Incomplete {
                received: 2,
                total: 3
            })
        ));
        assert_eq!(written, b"<0>");
    }

    #[tokio::test]
    async fn cancellation_stops_assembly() {
        let (_tx, mut rx) = mpsc::channel::<JobResult>(4);
        let token = CancellationToken::new();
        token.cancel();

        let mut assembler = OrderedAssembler::new(Vec::new(), "memory", 4);
        let outcome = assembler
            .run(&mut rx, &token, &ProgressCounter::default(), &NoProgress)
            .await;
        assert!(matches!(outcome, Err(DownloadError::Cancelled)));
    }

    #[tokio::test]
    async fn ready_results_are_not_written_after_cancellation() {
        let (tx, mut rx) = mpsc::channel(4);
        for result in [ok(0), ok(1), ok(2), ok(3)] {
            tx.try_send(result).unwrap();
        }
        let token = CancellationToken::new();
        token.cancel();

        let mut assembler = OrderedAssembler::new(Vec::new(), "memory", 4);
        let outcome = assembler
            .run(&mut rx, &token, &ProgressCounter::default(), &NoProgress)
            .await;

        assert!(matches!(outcome, Err(DownloadError::Cancelled)));
        assert_eq!(assembler.next_index(), 0);
        assert!(assembler.into_inner().is_empty());
    }

    #[tokio::test]
    async fn progress_reports_flushed_segments() {
        let (tx, mut rx) = mpsc::channel(3);
        for result in [ok(1), ok(0), ok(2)] {
            tx.try_send(result).unwrap();
        }
        drop(tx);

        let seen = Mutex::new(Vec::new());
        let sink = |p: DownloadProgress| seen.lock().unwrap().push(p.segments_done);
        let counter = ProgressCounter::default();
        counter.add_bytes(9);

        let mut assembler = OrderedAssembler::new(Vec::new(), "memory", 3);
        assembler
            .run(&mut rx, &CancellationToken::new(), &counter, &sink)
            .await
            .unwrap();

        // ok(1) alone flushes nothing, so it is not reported
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
        assert_eq!(assembler.buffered(), 0);
        assert_eq!(assembler.next_index(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Any completion order, with any set of lost segments, yields the
        /// surviving segments in manifest order.
        #[test]
        fn any_completion_order_yields_manifest_order(
            (order, lost) in (1usize..40).prop_flat_map(|n| (
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                proptest::collection::hash_set(0..n, 0..=n / 4),
            ))
        ) {
            let total = order.len();
            let results = order
                .iter()
                .map(|&i| if lost.contains(&i) { failed(i) } else { ok(i) })
                .collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (outcome, written) = runtime.block_on(assemble(total, results));

            let outcome = outcome.unwrap();
            prop_assert_eq!(written, expected_output(total, &lost));
            prop_assert_eq!(outcome.segments_written, total - lost.len());
            prop_assert_eq!(outcome.failures.failed(), lost.len());
        }
    }

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(clean_path(Path::new("/a/./b/../c.ts")), PathBuf::from("/a/c.ts"));
        assert_eq!(clean_path(Path::new("/../../etc/x")), PathBuf::from("/etc/x"));
    }

    #[test]
    fn traversal_out_of_base_dir_is_rejected() {
        let base = tempfile::tempdir().unwrap();

        let escape = base.path().join("../../etc/passwd");
        let err = resolve_output_path(&escape, Some(base.path())).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidPath { .. }));

        let sibling = base.path().join("sub/../../other.ts");
        assert!(resolve_output_path(&sibling, Some(base.path())).is_err());

        let outside = Path::new("/tmp/elsewhere.ts");
        assert!(resolve_output_path(outside, Some(base.path())).is_err());
    }

    #[test]
    fn paths_inside_base_dir_are_cleaned() {
        let base = tempfile::tempdir().unwrap();
        let requested = base.path().join("shows/./ep1/../ep2/video.ts");

        let resolved = resolve_output_path(&requested, Some(base.path())).unwrap();
        assert_eq!(resolved, base.path().join("shows/ep2/video.ts"));
    }

    #[test]
    fn directories_are_not_valid_outputs() {
        let base = tempfile::tempdir().unwrap();

        assert!(resolve_output_path(Path::new(""), None).is_err());
        assert!(resolve_output_path(base.path(), None).is_err());
        assert!(resolve_output_path(base.path(), Some(base.path())).is_err());

        let trailing = format!("{}/out/", base.path().display());
        assert!(resolve_output_path(Path::new(&trailing), None).is_err());
    }

    #[test]
    fn relative_paths_become_absolute() {
        let resolved = resolve_output_path(Path::new("downloads/./video.ts"), None).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("downloads/video.ts"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_file_and_parents_get_restrictive_modes() {
        use std::os::unix::fs::PermissionsExt;

        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("nested/dir/video.ts");
        let config = HlsOutputConfig::default();

        let mut file = create_output_file(&path, &config).await.unwrap();
        file.write_all(b"data").await.unwrap();
        file.flush().await.unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode & 0o077, 0, "file mode {file_mode:o} is group/world accessible");
        assert_eq!(dir_mode & 0o007, 0, "dir mode {dir_mode:o} is world accessible");
    }

    #[tokio::test]
    async fn existing_output_is_truncated() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("video.ts");
        std::fs::write(&path, b"a much longer previous download").unwrap();

        let mut file = create_output_file(&path, &HlsOutputConfig::default())
            .await
            .unwrap();
        file.write_all(b"new").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
