//! Transport error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::session::KeystreamExhausted;

/// Errors raised by the framed, encrypted transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect did not succeed within the reconnect budget.
    #[error("{addr} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        addr: String,
        attempts: u32,
        reason: String,
    },

    /// No reply arrived within the request timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The peer closed the connection or the stream failed.
    #[error("connection reset by peer")]
    Reset,

    /// The connection was closed locally while the operation was in flight.
    #[error("operation canceled: connection closed")]
    Canceled,

    /// The peer sent something that violates the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether retrying the operation could succeed.
    ///
    /// Protocol violations are deterministic and are not retried.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }

    /// Whether the underlying connection should be discarded.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Reset | Self::Canceled | Self::Io(_) | Self::Protocol(_)
        )
    }
}

impl From<KeystreamExhausted> for TransportError {
    fn from(e: KeystreamExhausted) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
