//! Session key derivation and the per-direction stream ciphers.
//!
//! ```text
//!   key        = SHA-256(K_be ‖ nonce)
//!   client IV  = SHA-256(key ‖ "c2s")[..12]
//!   server IV  = SHA-256(key ‖ "s2c")[..12]
//! ```
//!
//! Each direction runs its own ChaCha20 keystream, so the two sides never
//! reuse a (key, IV) pair.

use std::fmt;

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the server nonce mixed into the key.
pub const NONCE_LEN: usize = 32;

/// Symmetric key length.
pub const KEY_LEN: usize = 32;

/// Stream cipher IV length.
pub const IV_LEN: usize = 12;

const CLIENT_TO_SERVER: &[u8] = b"c2s";
const SERVER_TO_CLIENT: &[u8] = b"s2c";

/// Which end of the connection a codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Keys derived from a completed key agreement.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    key: [u8; KEY_LEN],
    client_iv: [u8; IV_LEN],
    server_iv: [u8; IV_LEN],
}

impl SessionKeys {
    /// Derives session keys from the big-endian shared secret and the
    /// server nonce.
    pub fn derive(shared_secret: &[u8], nonce: &[u8]) -> Self {
        let key: [u8; KEY_LEN] = Sha256::new()
            .chain_update(shared_secret)
            .chain_update(nonce)
            .finalize()
            .into();

        Self {
            client_iv: direction_iv(&key, CLIENT_TO_SERVER),
            server_iv: direction_iv(&key, SERVER_TO_CLIENT),
            key,
        }
    }

    /// Short non-secret identifier, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(&digest[..4])
    }

    /// Returns `(send, receive)` ciphers for the given role.
    pub fn ciphers(&self, role: Role) -> (SessionCipher, SessionCipher) {
        let client = SessionCipher::new(&self.key, &self.client_iv);
        let server = SessionCipher::new(&self.key, &self.server_iv);
        match role {
            Role::Client => (client, server),
            Role::Server => (server, client),
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn direction_iv(key: &[u8; KEY_LEN], label: &[u8]) -> [u8; IV_LEN] {
    let digest = Sha256::new().chain_update(key).chain_update(label).finalize();
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&digest[..IV_LEN]);
    iv
}

/// The keystream ran out (256 GiB in one direction).
#[derive(Debug, Error)]
#[error("session keystream exhausted")]
pub struct KeystreamExhausted;

/// One direction's keystream; applying it encrypts or decrypts in place.
pub struct SessionCipher {
    inner: ChaCha20,
}

impl SessionCipher {
    fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self {
            inner: ChaCha20::new(Key::from_slice(key), Nonce::from_slice(iv)),
        }
    }

    pub fn apply(&mut self, buf: &mut [u8]) -> Result<(), KeystreamExhausted> {
        self.inner
            .try_apply_keystream(buf)
            .map_err(|_| KeystreamExhausted)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCipher")
    }
}
