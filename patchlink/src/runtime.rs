//! Tokio runtime for the client.
//!
//! The runtime's worker threads are the socket I/O pool: every connection
//! actor and patch worker runs on them. Decompression and hashing go to the
//! separate blocking pool.

use std::io;

use tokio::runtime::{Builder, Runtime};

/// Thread name prefix for I/O workers.
pub const IO_THREAD_NAME: &str = "patchlink-io";

/// Builds a multi-threaded runtime with `io_workers` worker threads.
///
/// Zero is treated as one.
pub fn build_runtime(io_workers: usize) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(io_workers.max(1))
        .thread_name(IO_THREAD_NAME)
        .enable_all()
        .build()
}
