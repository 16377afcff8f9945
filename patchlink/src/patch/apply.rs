//! Staging, decompression and atomic replacement of files.
//!
//! Everything here is blocking and runs on the blocking thread pool.
//!
//! ```text
//! <root>/.patchlink/staging/<key>.part   compressed payload, append-only
//!              │ zlib decode + MD5
//!              ▼
//! <root>/<dir>/.<name>.<rand>.tmp        decompressed, synced
//!              │ rename
//!              ▼
//! <root>/<dir>/<name>
//! ```

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;

use super::error::PatchError;
use super::fs::PatchFs;
use super::local::{temp_name, to_native};
use crate::checksum::{Checksum, ChecksumVerifier, ChecksumWriter};
use crate::manifest::{ManifestEntry, STATE_DIR};

const STAGING_DIR: &str = "staging";
const BUFFER_SIZE: usize = 64 * 1024;

/// Directory holding partial downloads.
pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(STAGING_DIR)
}

/// Staging file for one manifest entry.
///
/// Keyed by path and expected checksum, so a payload staged for an older
/// manifest is never resumed against a newer one.
pub fn staging_path(root: &Path, entry: &ManifestEntry) -> PathBuf {
    let key = ChecksumVerifier::compute(entry.path.as_bytes());
    staging_dir(root).join(format!("{}-{}.part", key.to_hex(), entry.checksum.to_hex()))
}

/// Final location of an entry under `root`.
pub fn target_path(root: &Path, entry: &ManifestEntry) -> PathBuf {
    root.join(to_native(&entry.path))
}

/// A fresh temp path beside `target`.
pub fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(temp_name(&name))
}

/// Inflates `staging` into `temp`, returning the output checksum and length.
///
/// Output beyond the expected uncompressed size aborts early.
pub fn decompress_to_temp(
    fs: &dyn PatchFs,
    staging: &Path,
    temp: &Path,
    entry: &ManifestEntry,
) -> Result<(Checksum, u64), PatchError> {
    let expected = entry.uncompressed_size as u64;

    let input = fs.open(staging).map_err(|source| PatchError::ReadFailed {
        path: staging.to_path_buf(),
        source,
    })?;
    if let Some(parent) = temp.parent() {
        fs.create_dir_all(parent)
            .map_err(|source| PatchError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let output = fs.create(temp).map_err(|source| PatchError::WriteFailed {
        path: temp.to_path_buf(),
        source,
    })?;

    let write_failed = |source: io::Error| PatchError::WriteFailed {
        path: temp.to_path_buf(),
        source,
    };

    let mut decoder = ZlibDecoder::new(input);
    let mut writer = ChecksumWriter::new(output);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = match decoder.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(PatchError::Decompress {
                    path: entry.path.clone(),
                    reason: e.to_string(),
                })
            }
        };
        if writer.written() + n as u64 > expected {
            return Err(PatchError::SizeMismatch {
                path: entry.path.clone(),
                expected,
                actual: writer.written() + n as u64,
            });
        }
        writer.write_all(&buffer[..n]).map_err(write_failed)?;
    }

    let (mut output, checksum, len) = writer.finish();
    output.sync().map_err(write_failed)?;
    Ok((checksum, len))
}

/// Checks decompressed output against the manifest.
pub fn verify(entry: &ManifestEntry, checksum: Checksum, len: u64) -> Result<(), PatchError> {
    let expected = entry.uncompressed_size as u64;
    if len != expected {
        return Err(PatchError::SizeMismatch {
            path: entry.path.clone(),
            expected,
            actual: len,
        });
    }
    if checksum != entry.checksum {
        return Err(PatchError::ChecksumMismatch {
            path: entry.path.clone(),
            expected: entry.checksum,
            actual: checksum,
        });
    }
    Ok(())
}

/// Moves a verified temp file over its target.
pub fn commit(fs: &dyn PatchFs, temp: &Path, target: &Path) -> Result<(), PatchError> {
    fs.rename(temp, target)
        .map_err(|source| PatchError::WriteFailed {
            path: target.to_path_buf(),
            source,
        })
}
