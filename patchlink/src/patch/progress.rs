//! Progress reporting for a patch run.
//!
//! Workers update per-job atomic byte counters as chunks arrive; every
//! report sums them, so concurrent jobs never contend on a shared total.
//! Byte counts are compressed bytes, the unit that actually crosses the
//! network.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::job::{JobState, PatchJob};

/// Callback invoked on every job transition and downloaded chunk.
///
/// Called from worker tasks; must be cheap and must not block.
pub type ProgressCallback = Arc<dyn Fn(&PatchProgress) + Send + Sync>;

/// Snapshot of run progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchProgress {
    /// File whose change triggered this report.
    pub path: String,
    /// That file's state.
    pub state: JobState,
    pub files_done: usize,
    pub files_failed: usize,
    pub files_total: usize,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl PatchProgress {
    /// Fraction of bytes transferred, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.files_done + self.files_failed >= self.files_total {
                1.0
            } else {
                0.0
            };
        }
        self.bytes_done as f64 / self.bytes_total as f64
    }
}

/// Shared counters for one run.
pub(crate) struct ProgressTracker {
    job_bytes: Vec<AtomicU64>,
    files_done: AtomicUsize,
    files_failed: AtomicUsize,
    bytes_total: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(jobs: &[PatchJob], callback: Option<ProgressCallback>) -> Self {
        Self {
            job_bytes: jobs.iter().map(|_| AtomicU64::new(0)).collect(),
            files_done: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            bytes_total: jobs.iter().map(|j| j.entry().compressed_size as u64).sum(),
            callback,
        }
    }

    /// Sets the byte count for one job.
    pub fn set_bytes(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.job_bytes.get(index) {
            counter.store(bytes, Ordering::Relaxed);
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.job_bytes
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Reports a job transition, counting terminal states.
    pub fn record(&self, job: &PatchJob) {
        match job.state() {
            JobState::Done => {
                self.files_done.fetch_add(1, Ordering::AcqRel);
            }
            JobState::Failed => {
                self.files_failed.fetch_add(1, Ordering::AcqRel);
            }
            _ => {}
        }
        self.emit(job.path(), job.state());
    }

    /// Reports without a state change.
    pub fn emit(&self, path: &str, state: JobState) {
        if let Some(callback) = &self.callback {
            callback(&self.snapshot(path, state));
        }
    }

    pub fn snapshot(&self, path: &str, state: JobState) -> PatchProgress {
        PatchProgress {
            path: path.to_string(),
            state,
            files_done: self.files_done.load(Ordering::Acquire),
            files_failed: self.files_failed.load(Ordering::Acquire),
            files_total: self.job_bytes.len(),
            bytes_done: self.bytes_done(),
            bytes_total: self.bytes_total,
        }
    }
}
