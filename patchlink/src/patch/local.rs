//! Local install state: the scan and the persisted record cache.
//!
//! Hashing a large install on every run is the dominant cost of a no-op
//! update. The record cache at `<root>/.patchlink/records.json` remembers
//! the checksum of every file the engine has seen, keyed by path, and is
//! trusted only while the file's size and modification time are unchanged.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fs::{FileMeta, PatchFs};
use crate::checksum::{Checksum, ChecksumVerifier};
use crate::manifest::{Manifest, STATE_DIR};

/// File name of the record cache inside the state directory.
pub const RECORDS_FILE: &str = "records.json";

const CACHE_VERSION: u32 = 1;

/// Converts a `/`-separated relative path to a platform path.
pub fn to_native(path: &str) -> PathBuf {
    path.split('/').collect()
}

/// Modification time with nanosecond precision, as stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modified {
    pub secs: u64,
    pub nanos: u32,
}

impl From<SystemTime> for Modified {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// What is known about one local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileRecord {
    pub path: String,
    pub checksum: Checksum,
    pub size: u64,
    pub modified: Modified,
}

impl LocalFileRecord {
    pub fn new(path: impl Into<String>, checksum: Checksum, meta: FileMeta) -> Self {
        Self {
            path: path.into(),
            checksum,
            size: meta.size,
            modified: meta.modified.into(),
        }
    }

    fn matches(&self, meta: &FileMeta) -> bool {
        self.size == meta.size && self.modified == Modified::from(meta.modified)
    }
}

/// Persisted checksums keyed by relative path.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordCache {
    version: u32,
    records: BTreeMap<String, LocalFileRecord>,
}

impl Default for RecordCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl RecordCache {
    /// Location of the cache for an install root.
    pub fn path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(RECORDS_FILE)
    }

    /// Loads the cache, falling back to empty on any problem.
    ///
    /// A missing or unreadable cache only costs a full rehash.
    pub fn load(fs: &dyn PatchFs, root: &Path) -> Self {
        let path = Self::path(root);
        let reader = match fs.open(&path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open record cache, rehashing");
                return Self::default();
            }
        };

        match serde_json::from_reader::<_, RecordCache>(reader) {
            Ok(cache) if cache.version == CACHE_VERSION => {
                debug!(records = cache.records.len(), "Loaded record cache");
                cache
            }
            Ok(cache) => {
                warn!(version = cache.version, "Ignoring record cache with unknown version");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt record cache, rehashing");
                Self::default()
            }
        }
    }

    /// Writes the cache atomically.
    pub fn save(&self, fs: &dyn PatchFs, root: &Path) -> io::Result<()> {
        let dir = root.join(STATE_DIR);
        fs.create_dir_all(&dir)?;

        let temp = dir.join(format!("{RECORDS_FILE}.tmp"));
        let mut sink = fs.create(&temp)?;
        serde_json::to_writer_pretty(&mut sink, self).map_err(io::Error::other)?;
        sink.sync()?;
        drop(sink);

        fs.rename(&temp, &Self::path(root))
    }

    /// Cached checksum for `path`, if its size and mtime still match.
    pub fn lookup(&self, path: &str, meta: &FileMeta) -> Option<Checksum> {
        self.records
            .get(path)
            .filter(|r| r.matches(meta))
            .map(|r| r.checksum)
    }

    pub fn get(&self, path: &str) -> Option<&LocalFileRecord> {
        self.records.get(path)
    }

    pub fn insert(&mut self, record: LocalFileRecord) {
        self.records.insert(record.path.clone(), record);
    }

    pub fn remove(&mut self, path: &str) {
        self.records.remove(path);
    }

    /// Keeps only records whose path satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.records.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of scanning an install root against a manifest.
#[derive(Debug, Default)]
pub struct LocalScan {
    /// Manifest-listed files present locally, with their checksums.
    pub records: BTreeMap<String, LocalFileRecord>,
    /// Files the manifest does not list.
    pub unlisted: Vec<String>,
    /// Temp files left behind by an interrupted apply.
    pub stale_temps: Vec<String>,
    /// Files hashed from disk.
    pub hashed: usize,
    /// Files whose checksum came from the cache.
    pub reused: usize,
}

/// Lists `root` and checksums every file the manifest names.
///
/// The state directory is skipped. Unlisted files are reported but not
/// hashed. A listed file that cannot be read is treated as absent so it
/// gets downloaded again.
pub fn scan_local(
    fs: &dyn PatchFs,
    root: &Path,
    manifest: &Manifest,
    cache: &RecordCache,
) -> io::Result<LocalScan> {
    let mut scan = LocalScan::default();

    for stat in fs.list(root)? {
        if stat.path.split('/').next() == Some(STATE_DIR) {
            continue;
        }
        if manifest.get(&stat.path).is_none() {
            if is_temp_file(&stat.path) {
                scan.stale_temps.push(stat.path);
            } else {
                scan.unlisted.push(stat.path);
            }
            continue;
        }

        let checksum = match cache.lookup(&stat.path, &stat.meta) {
            Some(checksum) => {
                scan.reused += 1;
                checksum
            }
            None => {
                let hashed = fs
                    .open(&root.join(to_native(&stat.path)))
                    .and_then(ChecksumVerifier::compute_reader);
                match hashed {
                    Ok((checksum, _)) => {
                        scan.hashed += 1;
                        checksum
                    }
                    Err(e) => {
                        warn!(path = %stat.path, error = %e, "Cannot hash local file, will download");
                        continue;
                    }
                }
            }
        };

        scan.records.insert(
            stat.path.clone(),
            LocalFileRecord::new(stat.path, checksum, stat.meta),
        );
    }

    debug!(
        present = scan.records.len(),
        hashed = scan.hashed,
        reused = scan.reused,
        unlisted = scan.unlisted.len(),
        "Local scan complete"
    );
    Ok(scan)
}

/// Temp name for writing `file_name` beside its target.
pub(crate) fn temp_name(file_name: &str) -> String {
    format!(".{file_name}.{:08x}.tmp", rand::random::<u32>())
}

/// Whether a relative path looks like a file produced by [`temp_name`].
pub(crate) fn is_temp_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some(stem) = name
        .strip_prefix('.')
        .and_then(|n| n.strip_suffix(".tmp"))
    else {
        return false;
    };
    let Some((base, tag)) = stem.rsplit_once('.') else {
        return false;
    };
    !base.is_empty() && tag.len() == 8 && tag.chars().all(|c| c.is_ascii_hexdigit())
}
