//! Filesystem seam for the patch engine.
//!
//! Every disk operation the engine performs goes through [`PatchFs`], so
//! tests can inject write failures and crashes without touching a real
//! disk's failure modes. [`LocalFs`] is the production implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::SystemTime;

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
}

/// A regular file found by [`PatchFs::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Path relative to the listed root, `/`-separated.
    pub path: String,
    pub meta: FileMeta,
}

/// Writable file handle.
pub trait FileSink: Write + Send {
    /// Flushes buffers and forces the data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

/// Disk operations used by the engine.
pub trait PatchFs: Send + Sync + 'static {
    /// Every regular file under `root`, recursively. A missing root lists
    /// as empty.
    fn list(&self, root: &Path) -> io::Result<Vec<FileStat>>;

    /// Metadata for a regular file, or `None` if it does not exist.
    fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Creates or truncates.
    fn create(&self, path: &Path) -> io::Result<Box<dyn FileSink>>;

    /// Opens for appending, creating if missing.
    fn append(&self, path: &Path) -> io::Result<Box<dyn FileSink>>;

    /// Atomically replaces `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(fs: &dyn PatchFs, path: &Path) -> io::Result<()> {
    match fs.remove(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

struct LocalSink(BufWriter<File>);

impl Write for LocalSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FileSink for LocalSink {
    fn sync(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.get_ref().sync_all()
    }
}

fn meta_of(metadata: &fs::Metadata) -> io::Result<FileMeta> {
    Ok(FileMeta {
        size: metadata.len(),
        modified: metadata.modified()?,
    })
}

impl PatchFs for LocalFs {
    fn list(&self, root: &Path) -> io::Result<Vec<FileStat>> {
        let mut files = Vec::new();
        let mut pending = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound && prefix.is_empty() => {
                    return Ok(files)
                }
                Err(e) => return Err(e),
            };

            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    // Non-UTF-8 names can never match a manifest path
                    continue;
                };
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };

                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push((entry.path(), relative));
                } else if file_type.is_file() {
                    files.push(FileStat {
                        path: relative,
                        meta: meta_of(&entry.metadata()?)?,
                    });
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>> {
        match fs::metadata(path) {
            Ok(m) if m.is_file() => Ok(Some(meta_of(&m)?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn FileSink>> {
        Ok(Box::new(LocalSink(BufWriter::new(File::create(path)?))))
    }

    fn append(&self, path: &Path) -> io::Result<Box<dyn FileSink>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(LocalSink(BufWriter::new(file))))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}
