//! Configuration file handling for ~/.patchlink/config.ini.
//!
//! Loads and saves user configuration with sensible defaults, and turns it
//! into the typed configs the library components take.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::settings::ConfigFile;
use crate::patch::{PatchConfig, RemovalPolicy};
use crate::transport::{RetryPolicy, TransportConfig};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.patchlink/config.ini).
    ///
    /// A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path and whether the file was created.
    pub fn ensure_exists() -> Result<(PathBuf, bool), ConfigFileError> {
        let path = config_file_path();
        if path.exists() {
            return Ok((path, false));
        }
        Self::default().save_to(&path)?;
        Ok((path, true))
    }

    /// Transport settings for the session pool.
    pub fn transport_config(&self) -> TransportConfig {
        let transport = &self.transport;
        TransportConfig::default()
            .with_connect_timeout(Duration::from_secs(transport.connect_timeout))
            .with_request_timeout(Duration::from_secs(transport.request_timeout))
            .with_reconnect(RetryPolicy::exponential(transport.max_connect_attempts))
            .with_build_id(self.server.build_id)
    }

    /// Settings for the patch engine.
    pub fn patch_config(&self) -> PatchConfig {
        let patch = &self.patch;
        let removal = if patch.remove_extraneous {
            RemovalPolicy::Remove
        } else {
            RemovalPolicy::Retain
        };
        PatchConfig::default()
            .with_concurrency(patch.concurrency)
            .with_max_retries(patch.max_retries)
            .with_retry_base_delay(Duration::from_millis(patch.retry_base_delay_ms))
            .with_removal(removal)
    }
}

/// Get the path to the config directory (~/.patchlink).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".patchlink")
}

/// Get the path to the config file (~/.patchlink/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
