//! Transport configuration.

use std::time::Duration;

use super::retry::RetryPolicy;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single request/reply (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of TCP connect attempts.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Settings shared by the negotiator, connections and the session pool.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
    /// Timeout for the handshake reply and for each frame of a transaction.
    pub request_timeout: Duration,
    /// Backoff between TCP connect attempts. The handshake itself is never
    /// retried.
    pub reconnect: RetryPolicy,
    /// Protocol version announced in the client hello.
    pub protocol_version: u32,
    /// Client build announced in the client hello.
    pub build_id: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect: RetryPolicy::exponential(DEFAULT_MAX_CONNECT_ATTEMPTS),
            protocol_version: PROTOCOL_VERSION,
            build_id: 0,
        }
    }
}

impl TransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_build_id(mut self, build_id: u32) -> Self {
        self.build_id = build_id;
        self
    }
}
