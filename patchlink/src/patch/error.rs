//! Patch engine error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::report::PatchReport;
use crate::checksum::Checksum;
use crate::manifest::ManifestError;
use crate::session::AuthError;
use crate::transport::TransportError;

/// Why a single job failed.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Decompressed content does not hash to the manifest checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: Checksum,
        actual: Checksum,
    },

    /// A payload or decompressed file has the wrong length.
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// The payload is not a valid compressed stream.
    #[error("failed to decompress {path}: {reason}")]
    Decompress { path: String, reason: String },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server refused to serve the file.
    #[error("server rejected download of {path} (result {code})")]
    Rejected { path: String, code: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session could not be re-established for a non-transient reason.
    #[error("session error: {0}")]
    Session(AuthError),

    /// The retry budget ran out; `last` is the final attempt's error.
    #[error("{path} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        last: Box<PatchError>,
    },

    #[error("update canceled")]
    Canceled,
}

impl PatchError {
    /// Whether another attempt at the same job could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PatchError::ChecksumMismatch { .. }
            | PatchError::SizeMismatch { .. }
            | PatchError::Decompress { .. } => true,
            PatchError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the staged payload is bad and must be downloaded again from
    /// scratch.
    pub fn discards_payload(&self) -> bool {
        matches!(
            self,
            PatchError::ChecksumMismatch { .. }
                | PatchError::SizeMismatch { .. }
                | PatchError::Decompress { .. }
        )
    }
}

impl From<AuthError> for PatchError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unreachable(inner) => PatchError::Transport(inner),
            other => PatchError::Session(other),
        }
    }
}

/// Why a whole run did not complete.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to obtain manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Some jobs ended `Failed` or were left `Pending` by cancellation.
    #[error(
        "update incomplete: {} of {} file(s) not updated",
        .0.unfinished_count(),
        .0.jobs.len()
    )]
    Incomplete(PatchReport),
}

impl RunError {
    /// The per-job report, when the run got far enough to produce one.
    pub fn report(&self) -> Option<&PatchReport> {
        match self {
            RunError::Incomplete(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let mismatch = PatchError::ChecksumMismatch {
            path: "a".into(),
            expected: Checksum::default(),
            actual: Checksum::default(),
        };
        assert!(mismatch.is_retryable());
        assert!(mismatch.discards_payload());

        let reset = PatchError::Transport(TransportError::Reset);
        assert!(reset.is_retryable());
        assert!(!reset.discards_payload());

        let write = PatchError::WriteFailed {
            path: "a".into(),
            source: io::Error::other("disk full"),
        };
        assert!(!write.is_retryable());

        assert!(!PatchError::Rejected {
            path: "a".into(),
            code: 1
        }
        .is_retryable());
        assert!(!PatchError::Transport(TransportError::Protocol("x".into())).is_retryable());
    }

    #[test]
    fn test_auth_error_conversion() {
        let transient: PatchError = AuthError::Unreachable(TransportError::Reset).into();
        assert!(transient.is_retryable());

        let fatal: PatchError = AuthError::VersionMismatch {
            client: 1,
            server: 2,
        }
        .into();
        assert!(matches!(fatal, PatchError::Session(_)));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_exhausted_display_includes_cause() {
        let err = PatchError::RetriesExhausted {
            path: "a.dat".into(),
            attempts: 3,
            last: Box::new(PatchError::Transport(TransportError::Reset)),
        };
        assert_eq!(
            err.to_string(),
            "a.dat failed after 3 attempt(s): transport error: connection reset by peer"
        );
    }
}
