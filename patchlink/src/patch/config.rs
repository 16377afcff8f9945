//! Patch engine configuration.

use std::time::Duration;

use crate::transport::{RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER};

/// Default number of concurrent jobs.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default retries per file after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (250ms).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

/// Default cap on the retry delay (10 seconds).
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 10;

/// What to do with local files the manifest does not list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Report them and leave them alone. Temp files the engine itself left
    /// behind (`.<name>.<8 hex>.tmp`) are still swept.
    #[default]
    Retain,
    /// Delete them once every job has finished.
    Remove,
}

/// Settings for a patch run.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchConfig {
    /// Jobs processed at once. Values below 1 are treated as 1.
    pub concurrency: usize,
    /// Retries per file after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub retry_base_delay: Duration,
    /// Cap on the retry delay.
    pub retry_max_delay: Duration,
    pub removal: RemovalPolicy,
    /// Trust cached checksums for files whose size and mtime are unchanged.
    pub use_record_cache: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            retry_max_delay: Duration::from_secs(DEFAULT_RETRY_MAX_DELAY_SECS),
            removal: RemovalPolicy::Retain,
            use_record_cache: true,
        }
    }
}

impl PatchConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_removal(mut self, removal: RemovalPolicy) -> Self {
        self.removal = removal;
        self
    }

    pub fn with_record_cache(mut self, enabled: bool) -> Self {
        self.use_record_cache = enabled;
        self
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Backoff between attempts of one job.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::ExponentialBackoff {
            max_attempts: self.max_retries.saturating_add(1),
            initial_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}
