//! Per-file job state.
//!
//! # State machine
//!
//! ```text
//!  Pending ──► Downloading ──► Verifying ──► Applying ──► Done
//!     ▲            │               │             │
//!     └── retry ───┴───────────────┘             │
//!                  │               │             │
//!                  └───────────────┴─────────────┴──► Failed
//! ```
//!
//! `Done` and `Failed` are terminal. A job returns to `Pending` only while
//! its retry budget lasts, or when a run is canceled mid-download.

use std::fmt;

use super::error::PatchError;
use crate::manifest::ManifestEntry;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Downloading,
    Verifying,
    Applying,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Verifying => "verifying",
            JobState::Applying => "applying",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Verifying)
                | (Verifying, Applying)
                | (Applying, Done)
                | (Downloading, Pending)
                | (Verifying, Pending)
                | (Downloading, Failed)
                | (Verifying, Failed)
                | (Applying, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One file to bring up to date.
#[derive(Debug)]
pub struct PatchJob {
    index: usize,
    entry: ManifestEntry,
    state: JobState,
    bytes_received: u64,
    retry_count: u32,
    last_error: Option<PatchError>,
}

impl PatchJob {
    pub(crate) fn new(index: usize, entry: ManifestEntry) -> Self {
        Self {
            index,
            entry,
            state: JobState::Pending,
            bytes_received: 0,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Position of this job in the run; stable across retries.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entry(&self) -> &ManifestEntry {
        &self.entry
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Compressed bytes held in staging for this job.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Retries consumed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&PatchError> {
        self.last_error.as_ref()
    }

    pub(crate) fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {} for {}",
            self.state,
            next,
            self.entry.path
        );
        self.state = next;
    }

    pub(crate) fn set_bytes_received(&mut self, bytes: u64) {
        self.bytes_received = bytes;
    }

    /// Back to `Pending`, consuming one retry.
    pub(crate) fn retry(&mut self, error: PatchError) {
        self.retry_count += 1;
        self.last_error = Some(error);
        self.transition(JobState::Pending);
    }

    /// Back to `Pending` without consuming a retry.
    pub(crate) fn interrupt(&mut self) {
        self.transition(JobState::Pending);
    }

    pub(crate) fn fail(&mut self, error: PatchError) {
        self.last_error = Some(error);
        self.transition(JobState::Failed);
    }
}
