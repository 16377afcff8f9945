//! Manifest entries and the manifest list encoding.
//!
//! # List encoding
//!
//! ```text
//! count: u32 LE
//! count × { path: u16 len + UTF-8 │ checksum: [u8; 16] │ compressed: u32 │ uncompressed: u32 }
//! list_checksum: [u8; 16]      MD5 over every byte before it, count included
//! ```

use std::path::PathBuf;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{ManifestError, ManifestResult};
use crate::checksum::{Checksum, ChecksumVerifier, CHECKSUM_LEN};
use crate::protocol::{put_string, WireReader};

/// Name of the client's state directory at the root of every install.
///
/// Manifests may not place files inside it.
pub const STATE_DIR: &str = ".patchlink";

/// Smallest possible encoded entry: empty path prefix, checksum, two sizes.
const MIN_ENTRY_LEN: usize = 2 + CHECKSUM_LEN + 4 + 4;

/// One file the server says should exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Relative path, `/`-separated.
    pub path: String,
    /// Checksum of the decompressed content.
    pub checksum: Checksum,
    /// Size of the payload as transferred.
    pub compressed_size: u32,
    /// Size of the file once written.
    pub uncompressed_size: u32,
}

impl ManifestEntry {
    pub fn new(
        path: impl Into<String>,
        checksum: Checksum,
        compressed_size: u32,
        uncompressed_size: u32,
    ) -> Self {
        Self {
            path: path.into(),
            checksum,
            compressed_size,
            uncompressed_size,
        }
    }

    /// The entry path as a platform path relative to the install root.
    pub fn relative_path(&self) -> PathBuf {
        self.path.split('/').collect()
    }
}

/// A validated, path-ordered file list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Validates and sorts entries.
    ///
    /// Rejects unsafe paths and duplicates.
    pub fn new(mut entries: Vec<ManifestEntry>) -> ManifestResult<Self> {
        for entry in &entries {
            validate_path(&entry.path)
                .map_err(|reason| ManifestError::Malformed(format!("{:?}: {reason}", entry.path)))?;
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(pair) = entries.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(ManifestError::Malformed(format!(
                "duplicate entry {:?}",
                pair[0].path
            )));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn total_compressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.compressed_size as u64).sum()
    }

    pub fn total_uncompressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.uncompressed_size as u64).sum()
    }

    /// Serializes the entry list followed by its checksum.
    pub fn encode(&self) -> ManifestResult<Bytes> {
        let mut buf = self.encode_list()?;
        let checksum = ChecksumVerifier::compute(&buf);
        buf.put_slice(checksum.as_bytes());
        Ok(buf.freeze())
    }

    /// Checksum over the encoded entry list.
    pub fn list_checksum(&self) -> ManifestResult<Checksum> {
        Ok(ChecksumVerifier::compute(&self.encode_list()?))
    }

    /// Parses and validates an encoded manifest.
    ///
    /// The list checksum is checked before any entry is parsed.
    pub fn decode(bytes: &[u8]) -> ManifestResult<Self> {
        if bytes.len() < 4 + CHECKSUM_LEN {
            return Err(ManifestError::Malformed(format!(
                "{} bytes is too short for a manifest",
                bytes.len()
            )));
        }

        let (list, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        let mut expected = [0u8; CHECKSUM_LEN];
        expected.copy_from_slice(trailer);
        let expected = Checksum::from_bytes(expected);
        let actual = ChecksumVerifier::compute(list);
        if actual != expected {
            return Err(ManifestError::ChecksumMismatch { expected, actual });
        }

        let malformed = |e: crate::protocol::WireError| ManifestError::Malformed(e.to_string());
        let mut reader = WireReader::new(list);
        let count = reader.u32().map_err(malformed)? as usize;

        // Bound the allocation by what the buffer could actually hold
        let mut entries = Vec::with_capacity(count.min(reader.remaining() / MIN_ENTRY_LEN));
        for _ in 0..count {
            let path = reader.string().map_err(malformed)?;
            let checksum = Checksum::from_bytes(reader.array().map_err(malformed)?);
            let compressed_size = reader.u32().map_err(malformed)?;
            let uncompressed_size = reader.u32().map_err(malformed)?;
            entries.push(ManifestEntry {
                path,
                checksum,
                compressed_size,
                uncompressed_size,
            });
        }
        reader.finish().map_err(malformed)?;

        Self::new(entries)
    }

    fn encode_list(&self) -> ManifestResult<BytesMut> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| ManifestError::Malformed("too many entries".to_string()))?;

        let mut buf = BytesMut::new();
        buf.put_u32_le(count);
        for entry in &self.entries {
            put_string(&mut buf, &entry.path)
                .map_err(|e| ManifestError::Malformed(e.to_string()))?;
            buf.put_slice(entry.checksum.as_bytes());
            buf.put_u32_le(entry.compressed_size);
            buf.put_u32_le(entry.uncompressed_size);
        }
        Ok(buf)
    }
}

/// Checks that a manifest path stays inside the install root.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    if path.starts_with('/') {
        return Err("absolute path".to_string());
    }
    if path.contains('\\') || path.contains('\0') || path.contains(':') {
        return Err("path contains a reserved character".to_string());
    }

    for (i, component) in path.split('/').enumerate() {
        match component {
            "" => return Err("empty path component".to_string()),
            "." | ".." => return Err("relative path component".to_string()),
            STATE_DIR if i == 0 => return Err(format!("{STATE_DIR} is reserved")),
            _ => {}
        }
    }
    Ok(())
}
