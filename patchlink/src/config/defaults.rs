//! Default values for every configuration setting.

use std::path::PathBuf;

use super::file::config_directory;
use super::settings::*;
use crate::patch::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::transport::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Default server address for both endpoints.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:14617";

/// Default client build.
pub const DEFAULT_BUILD_ID: u32 = 1;

/// Default product name.
pub const DEFAULT_PRODUCT: &str = "client";

/// Default I/O worker threads.
pub const DEFAULT_IO_WORKERS: usize = 2;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "patchlink.log";

/// Default install root (~/patchlink).
pub fn default_destination() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchlink")
}

/// Default log directory (~/.patchlink/logs).
pub fn default_log_directory() -> PathBuf {
    config_directory().join("logs")
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                auth_address: DEFAULT_SERVER_ADDRESS.to_string(),
                content_address: DEFAULT_SERVER_ADDRESS.to_string(),
                build_id: DEFAULT_BUILD_ID,
                product: DEFAULT_PRODUCT.to_string(),
            },
            patch: PatchSettings {
                destination: default_destination(),
                concurrency: DEFAULT_CONCURRENCY,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                remove_extraneous: false,
            },
            transport: TransportSettings {
                io_workers: DEFAULT_IO_WORKERS,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
                request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
                max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            },
            logging: LoggingSettings {
                directory: default_log_directory(),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
