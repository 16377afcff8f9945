//! Manifest retrieval errors.

use thiserror::Error;

use crate::checksum::Checksum;
use crate::session::AuthError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be parsed or contains unsafe entries.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// The list checksum does not match the entries.
    #[error("manifest checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },

    /// The server answered with a non-zero result code.
    #[error("server rejected manifest request for '{product}' (result {code})")]
    Rejected { product: String, code: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session error: {0}")]
    Auth(#[from] AuthError),
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
