//! MD5 content checksums for manifest entries and downloaded payloads.
//!
//! The 16-byte digest is what the patch server publishes for every file, so
//! it is the only checksum that can be compared against the manifest. It
//! detects corruption in transit or on disk; it offers no resistance to a
//! deliberate forgery.
//!
//! Files are hashed in fixed-size chunks so memory use stays constant
//! regardless of file size.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of a checksum in bytes.
pub const CHECKSUM_LEN: usize = 16;

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// A 128-bit content checksum.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes, as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// Lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the lowercase or uppercase hexadecimal form.
    pub fn from_hex(s: &str) -> Result<Self, ChecksumParseError> {
        let s = s.trim();
        if s.len() != CHECKSUM_LEN * 2 {
            return Err(ChecksumParseError::Length {
                expected: CHECKSUM_LEN * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; CHECKSUM_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a hexadecimal checksum.
#[derive(Debug, Error)]
pub enum ChecksumParseError {
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Computes and verifies content checksums.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Checksum of an in-memory buffer.
    pub fn compute(bytes: &[u8]) -> Checksum {
        Checksum(Md5::digest(bytes).into())
    }

    /// Streams a reader to the end, returning its checksum and length.
    pub fn compute_reader<R: Read>(mut reader: R) -> io::Result<(Checksum, u64)> {
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
            total += bytes_read as u64;
        }

        Ok((Checksum(hasher.finalize().into()), total))
    }

    /// Checksum of a file on disk.
    pub fn compute_file(path: &Path) -> io::Result<Checksum> {
        let file = File::open(path)?;
        Self::compute_reader(file).map(|(checksum, _)| checksum)
    }

    /// Returns whether the file at `path` hashes to `expected`.
    ///
    /// A missing or unreadable file is an error, not a mismatch.
    pub fn verify(path: &Path, expected: &Checksum) -> io::Result<bool> {
        Ok(Self::compute_file(path)? == *expected)
    }
}

/// Writer adapter that hashes everything written through it.
///
/// Used to checksum decompressed output while it streams to disk, so the
/// content never has to be read back.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: Md5,
    written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the inner writer together with the checksum and length of
    /// everything written.
    pub fn finish(self) -> (W, Checksum, u64) {
        (self.inner, Checksum(self.hasher.finalize().into()), self.written)
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
