//! Outcome of a patch run.

use super::job::{JobState, PatchJob};

/// Final state of every job plus what happened to unlisted files.
#[derive(Debug, Default)]
pub struct PatchReport {
    /// Jobs in manifest order.
    pub jobs: Vec<PatchJob>,
    /// Manifest entries that were already up to date.
    pub up_to_date: usize,
    /// Local files the manifest does not list.
    pub extraneous: Vec<String>,
    /// Extraneous files that were deleted.
    pub removed: Vec<String>,
}

impl PatchReport {
    /// Every job reached `Done`.
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|j| j.state() == JobState::Done)
    }

    pub fn downloaded_count(&self) -> usize {
        self.count(JobState::Done)
    }

    pub fn failed_count(&self) -> usize {
        self.count(JobState::Failed)
    }

    /// Jobs that did not reach `Done`.
    pub fn unfinished_count(&self) -> usize {
        self.jobs.len() - self.downloaded_count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PatchJob> {
        self.jobs.iter().filter(|j| j.state() == JobState::Failed)
    }

    pub fn job(&self, path: &str) -> Option<&PatchJob> {
        self.jobs.iter().find(|j| j.path() == path)
    }

    fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state() == state).count()
    }
}
