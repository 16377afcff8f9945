//! The patch run: scan, diff, download, verify, apply.
//!
//! ```text
//! ManifestSource ──► scan + diff ──► JobQueue ──► worker × concurrency
//!                   (blocking)                      │
//!                                                   ├─ fetch → staging (append)
//!                                                   ├─ inflate → temp, MD5
//!                                                   └─ rename → target
//! ```
//!
//! Workers never share a job. A failing job is retried with backoff until
//! its budget runs out and then marked `Failed`; siblings carry on.
//!
//! Downloaded chunks are appended to the staging file from the worker task
//! itself, through the buffered sink `PatchFs::append` returns. Scanning,
//! inflating and renaming run on the blocking pool. On a slow disk the chunk
//! writes stall the I/O worker threads shared with the connections; raise
//! `transport.io_workers` there.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::apply::{self, staging_dir, staging_path, target_path, temp_path};
use super::config::{PatchConfig, RemovalPolicy};
use super::diff::diff;
use super::error::{PatchError, RunError};
use super::fs::{remove_if_exists, FileSink, PatchFs};
use super::job::{JobState, PatchJob};
use super::local::{scan_local, to_native, LocalFileRecord, RecordCache};
use super::progress::{ProgressCallback, ProgressTracker};
use super::queue::JobQueue;
use super::report::PatchReport;
use super::source::{ChunkSink, FetchError, PayloadSource};
use crate::manifest::{Manifest, ManifestEntry, ManifestSource};
use crate::transport::RetryPolicy;

/// Brings an install root in line with a manifest.
///
/// One engine can run many times; cancellation through its token is
/// permanent, so a canceled engine finishes every later run immediately.
pub struct PatchEngine {
    config: PatchConfig,
    source: Arc<dyn PayloadSource>,
    fs: Arc<dyn PatchFs>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl PatchEngine {
    pub fn new(config: PatchConfig, source: Arc<dyn PayloadSource>, fs: Arc<dyn PatchFs>) -> Self {
        Self {
            config,
            source,
            fs,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Uses an externally owned token, e.g. one tied to Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Runs one update of `root` against the manifest from `manifest`.
    ///
    /// Returns the report when every job reached `Done`, otherwise
    /// [`RunError::Incomplete`] carrying the final state of every job.
    pub async fn run(
        &self,
        manifest: &dyn ManifestSource,
        root: &Path,
    ) -> Result<PatchReport, RunError> {
        let started = Instant::now();
        let manifest = manifest.manifest().await?;
        let root = root.to_path_buf();

        info!(
            root = %root.display(),
            files = manifest.len(),
            "Starting patch run"
        );

        let Prepared {
            mut cache,
            jobs,
            up_to_date,
            extraneous,
        } = {
            let fs = Arc::clone(&self.fs);
            let scan_root = root.clone();
            let manifest = manifest.clone();
            let use_cache = self.config.use_record_cache;
            tokio::task::spawn_blocking(move || {
                prepare(fs.as_ref(), &scan_root, &manifest, use_cache)
            })
            .await
            .map_err(|e| io::Error::other(e.to_string()))
            .and_then(|r| r)
            .map_err(|source| RunError::Scan {
                path: root.clone(),
                source,
            })?
        };

        info!(
            jobs = jobs.len(),
            up_to_date,
            extraneous = extraneous.len(),
            "Local scan complete"
        );

        let tracker = ProgressTracker::new(&jobs, self.progress.clone());
        let worker_count = self.config.worker_count().min(jobs.len());
        let context = Arc::new(WorkerContext {
            source: Arc::clone(&self.source),
            fs: Arc::clone(&self.fs),
            root: root.clone(),
            policy: self.config.retry_policy(),
            queue: JobQueue::new(jobs, self.cancel.clone()),
            tracker,
            cancel: self.cancel.clone(),
        });

        let workers: Vec<_> = (0..worker_count)
            .map(|id| {
                let context = Arc::clone(&context);
                tokio::spawn(async move { context.work(id).await })
            })
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Patch worker aborted");
            }
        }

        let canceled = self.cancel.is_cancelled();
        let mut report = PatchReport {
            jobs: context.queue.drain(),
            up_to_date,
            extraneous,
            removed: Vec::new(),
        };

        // Refresh the cache and prune extras off the async workers
        let done: Vec<ManifestEntry> = report
            .jobs
            .iter()
            .filter(|j| j.state() == JobState::Done)
            .map(|j| j.entry().clone())
            .collect();
        let remove = if self.config.removal == RemovalPolicy::Remove && !canceled {
            report.extraneous.clone()
        } else {
            Vec::new()
        };
        let finished = {
            let fs = Arc::clone(&self.fs);
            let root = root.clone();
            tokio::task::spawn_blocking(move || {
                let removed = finish(fs.as_ref(), &root, &manifest, &mut cache, &done, &remove);
                if let Err(e) = cache.save(fs.as_ref(), &root) {
                    warn!(error = %e, "Failed to save record cache");
                }
                removed
            })
            .await
        };
        match finished {
            Ok(removed) => report.removed = removed,
            Err(e) => error!(error = %e, "Post-run bookkeeping aborted"),
        }

        info!(
            downloaded = report.downloaded_count(),
            failed = report.failed_count(),
            unfinished = report.unfinished_count(),
            removed = report.removed.len(),
            canceled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Patch run finished"
        );

        if report.is_success() {
            Ok(report)
        } else {
            Err(RunError::Incomplete(report))
        }
    }
}

struct Prepared {
    cache: RecordCache,
    jobs: Vec<PatchJob>,
    up_to_date: usize,
    extraneous: Vec<String>,
}

/// Scans and diffs `root`, clearing leftovers from earlier runs.
fn prepare(
    fs: &dyn PatchFs,
    root: &Path,
    manifest: &Manifest,
    use_cache: bool,
) -> io::Result<Prepared> {
    fs.create_dir_all(root)?;

    let mut cache = RecordCache::load(fs, root);
    let scan = if use_cache {
        scan_local(fs, root, manifest, &cache)?
    } else {
        scan_local(fs, root, manifest, &RecordCache::default())?
    };

    for temp in &scan.stale_temps {
        debug!(path = %temp, "Removing stale temp file");
        if let Err(e) = remove_if_exists(fs, &root.join(to_native(temp))) {
            warn!(path = %temp, error = %e, "Cannot remove stale temp file");
        }
    }

    for record in scan.records.values() {
        cache.insert(record.clone());
    }
    cache.retain(|path| scan.records.contains_key(path));

    let outcome = diff(manifest, &scan);

    // Partial payloads for anything but the current jobs can never resume
    let wanted: HashSet<PathBuf> = outcome
        .jobs
        .iter()
        .map(|j| staging_path(root, j.entry()))
        .collect();
    let staging = staging_dir(root);
    for stat in fs.list(&staging)? {
        let path = staging.join(to_native(&stat.path));
        if !wanted.contains(&path) {
            debug!(path = %path.display(), "Removing orphaned staging file");
            if let Err(e) = remove_if_exists(fs, &path) {
                warn!(path = %path.display(), error = %e, "Cannot remove orphaned staging file");
            }
        }
    }

    Ok(Prepared {
        cache,
        jobs: outcome.jobs,
        up_to_date: outcome.up_to_date,
        extraneous: outcome.extraneous,
    })
}

/// Records applied files and deletes `remove`. Returns what was deleted.
fn finish(
    fs: &dyn PatchFs,
    root: &Path,
    manifest: &Manifest,
    cache: &mut RecordCache,
    done: &[ManifestEntry],
    remove: &[String],
) -> Vec<String> {
    for entry in done {
        match fs.stat(&target_path(root, entry)) {
            Ok(Some(meta)) => {
                cache.insert(LocalFileRecord::new(entry.path.clone(), entry.checksum, meta))
            }
            Ok(None) => cache.remove(&entry.path),
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Cannot stat applied file");
                cache.remove(&entry.path);
            }
        }
    }
    cache.retain(|path| manifest.get(path).is_some());

    let mut removed = Vec::new();
    for path in remove {
        match remove_if_exists(fs, &root.join(to_native(path))) {
            Ok(()) => {
                info!(path = %path, "Removed extraneous file");
                removed.push(path.clone());
            }
            Err(e) => warn!(path = %path, error = %e, "Cannot remove extraneous file"),
        }
    }
    removed
}

/// State shared by the workers of one run.
struct WorkerContext {
    source: Arc<dyn PayloadSource>,
    fs: Arc<dyn PatchFs>,
    root: PathBuf,
    policy: RetryPolicy,
    queue: JobQueue,
    tracker: ProgressTracker,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn work(&self, id: usize) {
        debug!(worker = id, "Patch worker started");

        while let Some(mut job) = self.queue.claim().await {
            match self.attempt(&mut job).await {
                Ok(()) => {
                    job.transition(JobState::Done);
                    info!(path = %job.path(), bytes = job.bytes_received(), "File updated");
                    self.tracker.record(&job);
                    self.queue.complete(job);
                }
                Err(PatchError::Canceled) => {
                    debug!(path = %job.path(), "Download interrupted by cancellation");
                    job.interrupt();
                    self.tracker.record(&job);
                    self.queue.requeue(job);
                }
                Err(e) => self.settle_failure(job, e).await,
            }
        }

        debug!(worker = id, "Patch worker stopped");
    }

    /// One pass of download, verify and apply.
    async fn attempt(&self, job: &mut PatchJob) -> Result<(), PatchError> {
        let entry = job.entry().clone();
        let index = job.index();
        let total = entry.compressed_size as u64;
        let staging = staging_path(&self.root, &entry);

        job.transition(JobState::Downloading);
        self.tracker.record(job);

        let offset = {
            let fs = Arc::clone(&self.fs);
            let staging = staging.clone();
            blocking(&staging.clone(), move || resume_offset(fs.as_ref(), &staging, total)).await?
        };
        job.set_bytes_received(offset);
        self.tracker.set_bytes(index, offset);

        if offset < total {
            if offset > 0 {
                debug!(path = %entry.path, offset, total, "Resuming download");
            }

            let file = self
                .fs
                .append(&staging)
                .map_err(|source| PatchError::WriteFailed {
                    path: staging.clone(),
                    source,
                })?;
            let mut sink = StagingSink {
                file,
                written: offset,
                index,
                path: &entry.path,
                tracker: &self.tracker,
            };

            let fetched = tokio::select! {
                result = self.source.fetch(&entry, offset, &mut sink) => Some(result),
                _ = self.cancel.cancelled() => None,
            };

            let synced = sink.file.sync();
            job.set_bytes_received(sink.written);
            drop(sink);

            match fetched {
                None => return Err(PatchError::Canceled),
                Some(result) => result.map_err(|e| fetch_failure(&entry, &staging, e))?,
            }
            synced.map_err(|source| PatchError::WriteFailed {
                path: staging.clone(),
                source,
            })?;
        }

        if job.bytes_received() != total {
            return Err(PatchError::SizeMismatch {
                path: entry.path.clone(),
                expected: total,
                actual: job.bytes_received(),
            });
        }

        job.transition(JobState::Verifying);
        self.tracker.record(job);

        let target = target_path(&self.root, &entry);
        let temp = temp_path(&target);
        {
            let fs = Arc::clone(&self.fs);
            let (staging, inflate_temp, entry) = (staging.clone(), temp.clone(), entry.clone());
            let verified = blocking(&temp, move || {
                let (checksum, len) =
                    apply::decompress_to_temp(fs.as_ref(), &staging, &inflate_temp, &entry)?;
                apply::verify(&entry, checksum, len)
            })
            .await;
            if let Err(e) = verified {
                self.discard_temp(&temp).await;
                return Err(e);
            }
        }

        job.transition(JobState::Applying);
        self.tracker.record(job);

        {
            let fs = Arc::clone(&self.fs);
            let (commit_temp, commit_target) = (temp.clone(), target.clone());
            let committed = blocking(&target, move || {
                apply::commit(fs.as_ref(), &commit_temp, &commit_target)
            })
            .await;
            if let Err(e) = committed {
                self.discard_temp(&temp).await;
                return Err(e);
            }
        }

        let fs = Arc::clone(&self.fs);
        let cleared = tokio::task::spawn_blocking(move || remove_if_exists(fs.as_ref(), &staging)).await;
        if !matches!(cleared, Ok(Ok(()))) {
            warn!(path = %entry.path, "Cannot remove staging file");
        }

        Ok(())
    }

    /// Requeues `job` after a backoff, or fails it for good.
    async fn settle_failure(&self, mut job: PatchJob, error: PatchError) {
        let attempts = job.retry_count() + 1;

        if error.discards_payload() {
            let fs = Arc::clone(&self.fs);
            let staging = staging_path(&self.root, job.entry());
            let _ = tokio::task::spawn_blocking(move || remove_if_exists(fs.as_ref(), &staging)).await;
            job.set_bytes_received(0);
            self.tracker.set_bytes(job.index(), 0);
        }

        let delay = if error.is_retryable() && job.state() != JobState::Applying {
            self.policy.delay_for_attempt(attempts)
        } else {
            None
        };

        match delay {
            Some(delay) => {
                warn!(
                    path = %job.path(),
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying file"
                );
                job.retry(error);
                self.tracker.record(&job);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
                self.queue.requeue(job);
            }
            None => {
                let error = if error.is_retryable() {
                    PatchError::RetriesExhausted {
                        path: job.path().to_string(),
                        attempts,
                        last: Box::new(error),
                    }
                } else {
                    error
                };
                error!(path = %job.path(), error = %error, "File failed");
                job.fail(error);
                self.tracker.record(&job);
                self.queue.complete(job);
            }
        }
    }

    async fn discard_temp(&self, temp: &Path) {
        let fs = Arc::clone(&self.fs);
        let temp = temp.to_path_buf();
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = remove_if_exists(fs.as_ref(), &temp) {
                warn!(path = %temp.display(), error = %e, "Cannot remove temp file");
            }
        })
        .await;
    }
}

/// Length of a usable staged prefix. A staging file longer than the payload
/// is garbage and is removed.
fn resume_offset(fs: &dyn PatchFs, staging: &Path, total: u64) -> Result<u64, PatchError> {
    let write_failed = |source| PatchError::WriteFailed {
        path: staging.to_path_buf(),
        source,
    };

    if let Some(dir) = staging.parent() {
        fs.create_dir_all(dir).map_err(write_failed)?;
    }
    match fs.stat(staging).map_err(write_failed)? {
        Some(meta) if meta.size <= total => Ok(meta.size),
        Some(meta) => {
            debug!(path = %staging.display(), size = meta.size, total, "Discarding oversized staging file");
            fs.remove(staging).map_err(write_failed)?;
            Ok(0)
        }
        None => Ok(0),
    }
}

/// Runs blocking file work, attributing a lost task to `path`.
async fn blocking<T, F>(path: &Path, work: F) -> Result<T, PatchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PatchError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PatchError::WriteFailed {
            path: path.to_path_buf(),
            source: io::Error::other(e.to_string()),
        })?
}

fn fetch_failure(entry: &ManifestEntry, staging: &Path, error: FetchError) -> PatchError {
    match error {
        FetchError::Transport(e) => PatchError::Transport(e),
        FetchError::Auth(e) => e.into(),
        FetchError::Rejected(code) => PatchError::Rejected {
            path: entry.path.clone(),
            code,
        },
        FetchError::Sink(source) => PatchError::WriteFailed {
            path: staging.to_path_buf(),
            source,
        },
    }
}

/// Appends downloaded chunks to the staging file and reports progress.
struct StagingSink<'a> {
    file: Box<dyn FileSink>,
    written: u64,
    index: usize,
    path: &'a str,
    tracker: &'a ProgressTracker,
}

impl ChunkSink for StagingSink<'_> {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        self.tracker.set_bytes(self.index, self.written);
        self.tracker.emit(self.path, JobState::Downloading);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumVerifier;
    use crate::patch::fs::{FileMeta, FileStat, LocalFs};
    use crate::patch::progress::PatchProgress;
    use crate::transport::TransportError;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn noise(len: usize) -> Vec<u8> {
        (0..len).map(|_| rand::random::<u8>()).collect()
    }

    /// Serves payloads from memory with scriptable faults.
    #[derive(Default)]
    struct MemorySource {
        payloads: HashMap<String, Vec<u8>>,
        chunk_size: usize,
        corrupt: HashSet<String>,
        /// Once: reset the connection after this many bytes of a path.
        reset_after: Mutex<Option<(String, u64)>>,
        stall: bool,
        fetches: Mutex<Vec<(String, u64)>>,
    }

    impl MemorySource {
        fn serving(files: &[(&str, &[u8])]) -> (Self, Manifest) {
            let mut source = MemorySource {
                chunk_size: 256,
                ..Default::default()
            };
            let mut entries = Vec::new();
            for (path, data) in files {
                let compressed = compress(data);
                entries.push(ManifestEntry::new(
                    *path,
                    ChecksumVerifier::compute(data),
                    compressed.len() as u32,
                    data.len() as u32,
                ));
                source.payloads.insert(path.to_string(), compressed);
            }
            (source, Manifest::new(entries).unwrap())
        }

        fn fetch_count(&self, path: &str) -> usize {
            self.fetches.lock().iter().filter(|(p, _)| p == path).count()
        }

        fn offsets(&self, path: &str) -> Vec<u64> {
            self.fetches
                .lock()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, o)| *o)
                .collect()
        }

        async fn serve(
            &self,
            entry: &ManifestEntry,
            offset: u64,
            sink: &mut dyn ChunkSink,
        ) -> Result<(), FetchError> {
            self.fetches.lock().push((entry.path.clone(), offset));
            if self.stall {
                std::future::pending::<()>().await;
            }

            let mut payload = self
                .payloads
                .get(&entry.path)
                .cloned()
                .ok_or(FetchError::Rejected(1))?;
            if self.corrupt.contains(&entry.path) {
                for byte in payload.iter_mut().skip(2) {
                    *byte ^= 0x5a;
                }
            }

            let reset_at = {
                let mut reset = self.reset_after.lock();
                match reset.as_ref() {
                    Some((path, at)) if *path == entry.path => {
                        let at = *at;
                        *reset = None;
                        Some(at)
                    }
                    _ => None,
                }
            };

            let mut position = offset as usize;
            while position < payload.len() {
                let end = (position + self.chunk_size).min(payload.len());
                sink.write_chunk(&payload[position..end])
                    .map_err(FetchError::Sink)?;
                position = end;
                tokio::task::yield_now().await;
                if reset_at.is_some_and(|at| position as u64 >= at) {
                    return Err(TransportError::Reset.into());
                }
            }
            Ok(())
        }
    }

    impl PayloadSource for MemorySource {
        fn fetch<'a>(
            &'a self,
            entry: &'a ManifestEntry,
            offset: u64,
            sink: &'a mut dyn ChunkSink,
        ) -> BoxFuture<'a, Result<(), FetchError>> {
            Box::pin(self.serve(entry, offset, sink))
        }
    }

    /// Local filesystem whose temp-file writes fail after a byte budget and
    /// whose removals of `.part` files can be refused.
    struct FaultFs {
        temp_write_budget: usize,
        lock_staging: bool,
    }

    impl FaultFs {
        fn temp_budget(temp_write_budget: usize) -> Self {
            FaultFs {
                temp_write_budget,
                lock_staging: false,
            }
        }

        fn locked_staging() -> Self {
            FaultFs {
                temp_write_budget: usize::MAX,
                lock_staging: true,
            }
        }
    }

    struct FailingSink {
        inner: Box<dyn FileSink>,
        remaining: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.remaining {
                return Err(io::Error::other("disk full"));
            }
            self.remaining -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl FileSink for FailingSink {
        fn sync(&mut self) -> io::Result<()> {
            self.inner.sync()
        }
    }

    impl PatchFs for FaultFs {
        fn list(&self, root: &Path) -> io::Result<Vec<FileStat>> {
            LocalFs.list(root)
        }

        fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>> {
            LocalFs.stat(path)
        }

        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            LocalFs.open(path)
        }

        fn create(&self, path: &Path) -> io::Result<Box<dyn FileSink>> {
            let inner = LocalFs.create(path)?;
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"));
            if is_temp {
                Ok(Box::new(FailingSink {
                    inner,
                    remaining: self.temp_write_budget,
                }))
            } else {
                Ok(inner)
            }
        }

        fn append(&self, path: &Path) -> io::Result<Box<dyn FileSink>> {
            LocalFs.append(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            LocalFs.rename(from, to)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            if self.lock_staging && path.extension().is_some_and(|e| e == "part") {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            LocalFs.remove(path)
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            LocalFs.create_dir_all(path)
        }
    }

    fn fast_config() -> PatchConfig {
        PatchConfig::default().with_retry_base_delay(Duration::from_millis(1))
    }

    fn engine(source: Arc<MemorySource>, config: PatchConfig) -> PatchEngine {
        PatchEngine::new(config, source, Arc::new(LocalFs))
    }

    #[tokio::test]
    async fn test_fresh_install_reports_progress() {
        let dir = TempDir::new().unwrap();
        let data = b"Age of Teledahn ".repeat(64);
        let (source, manifest) = MemorySource::serving(&[("a.dat", &data)]);
        let source = Arc::new(source);
        let compressed_len = manifest.entries()[0].compressed_size as u64;

        let seen = Arc::new(Mutex::new(Vec::<PatchProgress>::new()));
        let callback: ProgressCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: &PatchProgress| seen.lock().push(p.clone()))
        };

        let report = engine(Arc::clone(&source), fast_config())
            .with_progress(callback)
            .run(&manifest, dir.path())
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].state(), JobState::Done);
        assert_eq!(fs::read(dir.path().join("a.dat")).unwrap(), data);

        let seen = seen.lock();
        let last = seen.last().unwrap();
        assert_eq!(last.state, JobState::Done);
        assert_eq!(last.files_done, 1);
        assert_eq!(last.bytes_done, compressed_len);
        assert_eq!(last.bytes_total, compressed_len);
        assert!(seen.iter().any(|p| p.state == JobState::Verifying));

        // Staging cleaned up, cache written
        assert!(LocalFs.list(&staging_dir(dir.path())).unwrap().is_empty());
        assert!(RecordCache::path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_second_run_downloads_nothing() {
        let dir = TempDir::new().unwrap();
        let (source, manifest) =
            MemorySource::serving(&[("a.dat", b"alpha"), ("dat/b.age", b"beta")]);
        let source = Arc::new(source);
        let engine = engine(Arc::clone(&source), fast_config());

        engine.run(&manifest, dir.path()).await.unwrap();
        assert_eq!(source.fetches.lock().len(), 2);

        let report = engine.run(&manifest, dir.path()).await.unwrap();
        assert!(report.jobs.is_empty());
        assert_eq!(report.up_to_date, 2);
        assert_eq!(source.fetches.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_without_cache_also_idle() {
        let dir = TempDir::new().unwrap();
        let (source, manifest) = MemorySource::serving(&[("a.dat", b"alpha")]);
        let source = Arc::new(source);

        engine(Arc::clone(&source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap();
        let report = engine(Arc::clone(&source), fast_config().with_record_cache(false))
            .run(&manifest, dir.path())
            .await
            .unwrap();

        assert_eq!(report.up_to_date, 1);
        assert_eq!(source.fetches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_outdated_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), b"stale bytes").unwrap();
        let (source, manifest) = MemorySource::serving(&[("a.dat", b"fresh bytes")]);

        let report = engine(Arc::new(source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap();

        assert_eq!(report.downloaded_count(), 1);
        assert_eq!(fs::read(dir.path().join("a.dat")).unwrap(), b"fresh bytes");
    }

    #[tokio::test]
    async fn test_corrupt_payload_exhausts_retries_without_stopping_siblings() {
        let dir = TempDir::new().unwrap();
        let (mut source, manifest) =
            MemorySource::serving(&[("bad.dat", &b"x".repeat(4096)), ("good.dat", b"good")]);
        source.corrupt.insert("bad.dat".to_string());
        let source = Arc::new(source);

        let err = engine(Arc::clone(&source), fast_config().with_max_retries(2))
            .run(&manifest, dir.path())
            .await
            .unwrap_err();

        let report = err.report().unwrap();
        let bad = report.job("bad.dat").unwrap();
        assert_eq!(bad.state(), JobState::Failed);
        assert_eq!(bad.retry_count(), 2);
        assert!(matches!(
            bad.last_error(),
            Some(PatchError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(source.fetch_count("bad.dat"), 3);
        // Every retry starts over since the payload was discarded
        assert!(source.offsets("bad.dat").iter().all(|o| *o == 0));

        assert_eq!(report.job("good.dat").unwrap().state(), JobState::Done);
        assert!(!dir.path().join("bad.dat").exists());
    }

    #[tokio::test]
    async fn test_failed_temp_write_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), b"original").unwrap();
        let (source, manifest) = MemorySource::serving(&[("a.dat", &b"replacement ".repeat(200))]);

        let engine = PatchEngine::new(
            fast_config(),
            Arc::new(source),
            Arc::new(FaultFs::temp_budget(100)),
        );
        let err = engine.run(&manifest, dir.path()).await.unwrap_err();

        let job = &err.report().unwrap().jobs[0];
        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(job.last_error(), Some(PatchError::WriteFailed { .. })));
        assert_eq!(fs::read(dir.path().join("a.dat")).unwrap(), b"original");

        let leftovers: Vec<_> = LocalFs
            .list(dir.path())
            .unwrap()
            .into_iter()
            .filter(|f| f.path.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_reset_mid_download_resumes_from_offset() {
        let dir = TempDir::new().unwrap();
        let data = noise(16 * 1024);
        let (source, manifest) = MemorySource::serving(&[("big.dat", &data)]);
        *source.reset_after.lock() = Some(("big.dat".to_string(), 1000));
        let source = Arc::new(source);

        let report = engine(Arc::clone(&source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap();

        assert_eq!(source.offsets("big.dat"), [0, 1024]);
        assert_eq!(report.jobs[0].retry_count(), 1);
        assert_eq!(fs::read(dir.path().join("big.dat")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_staged_prefix_from_earlier_run_is_resumed() {
        let dir = TempDir::new().unwrap();
        let data = noise(8 * 1024);
        let (source, manifest) = MemorySource::serving(&[("big.dat", &data)]);
        let entry = manifest.entries()[0].clone();

        let staging = staging_path(dir.path(), &entry);
        fs::create_dir_all(staging.parent().unwrap()).unwrap();
        fs::write(&staging, &source.payloads["big.dat"][..512]).unwrap();

        // A partial payload for a file no longer listed is swept
        let orphan = staging_dir(dir.path()).join("orphan.part");
        fs::write(&orphan, b"junk").unwrap();

        let source = Arc::new(source);
        engine(Arc::clone(&source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap();

        assert_eq!(source.offsets("big.dat"), [512]);
        assert_eq!(fs::read(dir.path().join("big.dat")).unwrap(), data);
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_locked_orphan_staging_file_does_not_block_run() {
        let dir = TempDir::new().unwrap();
        let (source, manifest) =
            MemorySource::serving(&[("a.dat", b"alpha"), ("dat/b.age", b"beta")]);
        let orphan = staging_dir(dir.path()).join("orphan.part");
        fs::create_dir_all(orphan.parent().unwrap()).unwrap();
        fs::write(&orphan, b"junk").unwrap();

        let source = Arc::new(source);
        let engine = PatchEngine::new(
            fast_config(),
            Arc::clone(&source) as Arc<dyn PayloadSource>,
            Arc::new(FaultFs::locked_staging()),
        );
        let report = engine.run(&manifest, dir.path()).await.unwrap();

        assert_eq!(report.downloaded_count(), 2);
        assert!(report.jobs.iter().all(|j| j.state() == JobState::Done));
        assert_eq!(source.fetches.lock().len(), 2);
        assert_eq!(fs::read(dir.path().join("a.dat")).unwrap(), b"alpha");
        assert_eq!(fs::read(dir.path().join("dat/b.age")).unwrap(), b"beta");
        assert!(orphan.exists());
    }

    #[tokio::test]
    async fn test_temp_left_by_crashed_run_is_swept() {
        let dir = TempDir::new().unwrap();
        let (source, manifest) = MemorySource::serving(&[("dat/a.dat", b"alpha")]);
        let source = Arc::new(source);
        let engine = engine(Arc::clone(&source), fast_config());
        engine.run(&manifest, dir.path()).await.unwrap();

        // A run killed between inflate and rename leaves its temp behind
        let target = dir.path().join("dat/a.dat");
        let leftover = temp_path(&target);
        fs::write(&leftover, b"half-inflated").unwrap();

        let report = engine.run(&manifest, dir.path()).await.unwrap();

        assert!(report.jobs.is_empty());
        assert_eq!(report.up_to_date, 1);
        assert!(report.extraneous.is_empty());
        assert!(!leftover.exists());
        assert_eq!(fs::read(&target).unwrap(), b"alpha");
        assert_eq!(source.fetches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_leaves_jobs_pending() {
        let dir = TempDir::new().unwrap();
        let (mut source, manifest) = MemorySource::serving(&[
            ("a.dat", b"a"),
            ("b.dat", b"b"),
            ("c.dat", b"c"),
        ]);
        source.stall = true;

        let engine = engine(Arc::new(source), fast_config().with_concurrency(2));
        let token = engine.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = engine.run(&manifest, dir.path()).await.unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.jobs.len(), 3);
        assert!(report.jobs.iter().all(|j| j.state() == JobState::Pending));
        assert!(report.jobs.iter().all(|j| j.retry_count() == 0));
    }

    #[tokio::test]
    async fn test_removal_policy() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.txt"), b"leftover").unwrap();
        let (source, manifest) = MemorySource::serving(&[("a.dat", b"alpha")]);
        let source = Arc::new(source);

        let report = engine(Arc::clone(&source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap();
        assert_eq!(report.extraneous, ["old.txt"]);
        assert!(report.removed.is_empty());
        assert!(dir.path().join("old.txt").exists());

        let report = engine(
            Arc::clone(&source),
            fast_config().with_removal(RemovalPolicy::Remove),
        )
        .run(&manifest, dir.path())
        .await
        .unwrap();
        assert_eq!(report.removed, ["old.txt"]);
        assert!(!dir.path().join("old.txt").exists());
        // The state directory is never extraneous
        assert!(RecordCache::path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_missing_payload_is_rejected_without_retry() {
        let dir = TempDir::new().unwrap();
        let (mut source, manifest) = MemorySource::serving(&[("a.dat", b"alpha")]);
        source.payloads.clear();
        let source = Arc::new(source);

        let err = engine(Arc::clone(&source), fast_config())
            .run(&manifest, dir.path())
            .await
            .unwrap_err();

        let job = &err.report().unwrap().jobs[0];
        assert!(matches!(job.last_error(), Some(PatchError::Rejected { code: 1, .. })));
        assert_eq!(source.fetch_count("a.dat"), 1);
    }
}
