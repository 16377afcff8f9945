//! Incremental install updates.
//!
//! The [`PatchEngine`] compares an install root with a server manifest and
//! downloads only what is missing or different. Each file is one
//! [`PatchJob`] moving through
//! `Pending → Downloading → Verifying → Applying → Done`, with `Failed` as
//! the other terminal state.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use patchlink::patch::{LocalFs, PatchConfig, PatchEngine, TransportPayloadSource};
//!
//! let source = Arc::new(TransportPayloadSource::new(Arc::clone(&transport)));
//! let engine = PatchEngine::new(PatchConfig::default(), source, Arc::new(LocalFs));
//! let report = engine.run(&manifest_client.source("client"), root).await?;
//! println!("{} file(s) updated", report.downloaded_count());
//! ```
//!
//! # On-disk state
//!
//! Everything the engine keeps between runs lives under `<root>/.patchlink`:
//! the record cache (`records.json`) and partial downloads (`staging/`).
//! Neither is ever reported as extraneous.

mod apply;
mod config;
mod diff;
mod engine;
mod error;
mod fs;
mod job;
mod local;
mod progress;
mod queue;
mod report;
mod source;

pub use apply::{staging_dir, staging_path, target_path};
pub use config::{
    PatchConfig, RemovalPolicy, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_SECS,
};
pub use diff::{diff, DiffOutcome};
pub use engine::PatchEngine;
pub use error::{PatchError, RunError};
pub use fs::{remove_if_exists, FileMeta, FileSink, FileStat, LocalFs, PatchFs};
pub use job::{JobState, PatchJob};
pub use local::{scan_local, LocalFileRecord, LocalScan, Modified, RecordCache, RECORDS_FILE};
pub use progress::{PatchProgress, ProgressCallback};
pub use report::PatchReport;
pub use source::{ChunkSink, FetchError, PayloadSource, TransportPayloadSource};
