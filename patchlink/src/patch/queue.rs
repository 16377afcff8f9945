//! Shared job queue for the worker pool.
//!
//! Workers claim jobs from the front. A job that needs another attempt is
//! pushed to the back; a job that reaches a terminal state is completed.
//! The pool drains when no job is pending or held by a worker, or when the
//! run is canceled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::job::PatchJob;

pub(crate) struct JobQueue {
    pending: Mutex<VecDeque<PatchJob>>,
    finished: Mutex<Vec<PatchJob>>,
    /// Jobs not yet completed, whether queued or held by a worker.
    outstanding: AtomicUsize,
    notify: Notify,
    cancel: CancellationToken,
}

impl JobQueue {
    pub fn new(jobs: Vec<PatchJob>, cancel: CancellationToken) -> Self {
        let outstanding = AtomicUsize::new(jobs.len());
        Self {
            pending: Mutex::new(jobs.into()),
            finished: Mutex::new(Vec::new()),
            outstanding,
            notify: Notify::new(),
            cancel,
        }
    }

    /// Next job to work on, or `None` once the run is over.
    ///
    /// Waits while every outstanding job is held by another worker, since
    /// one of them may be requeued.
    pub async fn claim(&self) -> Option<PatchJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between check and await
            // is not lost
            notified.as_mut().enable();

            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(job) = self.pending.lock().pop_front() {
                return Some(job);
            }
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => return None,
            }
        }
    }

    /// Returns a job for another attempt.
    pub fn requeue(&self, job: PatchJob) {
        self.pending.lock().push_back(job);
        self.notify.notify_one();
    }

    /// Records a job as finished for this run.
    pub fn complete(&self, job: PatchJob) {
        self.finished.lock().push(job);
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Takes every job, finished or not, in run order.
    pub fn drain(&self) -> Vec<PatchJob> {
        let mut jobs = std::mem::take(&mut *self.finished.lock());
        jobs.extend(self.pending.lock().drain(..));
        jobs.sort_by_key(|j| j.index());
        jobs
    }
}
