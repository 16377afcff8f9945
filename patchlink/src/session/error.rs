//! Session establishment errors.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while establishing a secured session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server speaks a different protocol version.
    #[error("protocol version mismatch: client speaks {client}, server speaks {server}")]
    VersionMismatch { client: u32, server: u32 },

    /// The server's key material was malformed or degenerate.
    #[error("key agreement failed: {0}")]
    KeyAgreementFailed(String),

    /// The server could not be reached, or the link failed mid-handshake.
    #[error("server unreachable: {0}")]
    Unreachable(#[from] TransportError),
}

impl AuthError {
    /// Whether a later attempt could succeed without changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Unreachable(e) => e.is_transient(),
            AuthError::VersionMismatch { .. } | AuthError::KeyAgreementFailed(_) => false,
        }
    }
}

/// Result type for session establishment.
pub type AuthResult<T> = Result<T, AuthError>;
