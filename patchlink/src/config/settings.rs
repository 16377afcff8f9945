//! Settings structs for each configuration section.
//!
//! Each struct is one `[section]` of `config.ini`. Parsing lives in
//! [`super::parser`], serialization in [`super::writer`].

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub patch: PatchSettings,
    pub transport: TransportSettings,
    pub logging: LoggingSettings,
}

/// Where to connect and what to ask for.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// `host:port` of the server that hands out manifests.
    pub auth_address: String,
    /// `host:port` of the server that serves file payloads.
    pub content_address: String,
    /// Client build announced during the handshake.
    pub build_id: u32,
    /// Product whose manifest is requested.
    pub product: String,
}

/// Patch run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSettings {
    /// Install root to update.
    pub destination: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Delete local files the manifest does not list.
    pub remove_extraneous: bool,
}

/// Network settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Runtime worker threads driving socket I/O.
    pub io_workers: usize,
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds.
    pub request_timeout: u64,
    pub max_connect_attempts: u32,
}

/// Log file settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
