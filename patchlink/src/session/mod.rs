//! Authenticated session establishment.
//!
//! A session is a TCP connection on which both sides completed a
//! Diffie-Hellman key agreement over fixed domain parameters and switched
//! to ChaCha20-encrypted frames.
//!
//! - [`DomainParameters`]: the embedded modulus, generator and client exponent
//! - [`SessionKeys`]: symmetric keys derived from the shared secret
//! - [`SessionNegotiator`]: dials, runs the handshake, returns a [`Session`]

mod error;
mod keys;
mod negotiator;
mod params;

pub use error::{AuthError, AuthResult};
pub use keys::{
    KeystreamExhausted, Role, SessionCipher, SessionKeys, IV_LEN, KEY_LEN, NONCE_LEN,
};
pub use negotiator::{Session, SessionNegotiator};
pub use params::{DomainParameters, KEY_BITS, KEY_BYTES};
