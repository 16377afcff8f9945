//! Configuration key access and validation.
//!
//! Type-safe get/set of configuration values by `section.key` name, used
//! by `patchlink config get|set`.

use std::str::FromStr;

use thiserror::Error;

use super::file::ConfigFileError;
use super::parser::{expand_tilde, parse_address, parse_bool, parse_number, parse_positive};
use super::settings::ConfigFile;
use super::writer::path_to_string;

/// Errors that can occur when getting or setting configuration values.
#[derive(Debug, Error)]
pub enum ConfigKeyError {
    /// Unknown configuration key.
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Validation failed for the value.
    #[error("Invalid value for {key}: {reason}")]
    ValidationFailed { key: String, reason: String },
}

/// Supported configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    // Server settings
    ServerAuthAddress,
    ServerContentAddress,
    ServerBuildId,
    ServerProduct,

    // Patch settings
    PatchDestination,
    PatchConcurrency,
    PatchMaxRetries,
    PatchRetryBaseDelayMs,
    PatchRemoveExtraneous,

    // Transport settings
    TransportIoWorkers,
    TransportConnectTimeout,
    TransportRequestTimeout,
    TransportMaxConnectAttempts,

    // Logging settings
    LoggingDirectory,
    LoggingFile,
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|key| key.name() == lower)
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

impl ConfigKey {
    /// Get the canonical key name (e.g., "patch.concurrency").
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::ServerAuthAddress => "server.auth_address",
            ConfigKey::ServerContentAddress => "server.content_address",
            ConfigKey::ServerBuildId => "server.build_id",
            ConfigKey::ServerProduct => "server.product",

            ConfigKey::PatchDestination => "patch.destination",
            ConfigKey::PatchConcurrency => "patch.concurrency",
            ConfigKey::PatchMaxRetries => "patch.max_retries",
            ConfigKey::PatchRetryBaseDelayMs => "patch.retry_base_delay_ms",
            ConfigKey::PatchRemoveExtraneous => "patch.remove_extraneous",

            ConfigKey::TransportIoWorkers => "transport.io_workers",
            ConfigKey::TransportConnectTimeout => "transport.connect_timeout",
            ConfigKey::TransportRequestTimeout => "transport.request_timeout",
            ConfigKey::TransportMaxConnectAttempts => "transport.max_connect_attempts",

            ConfigKey::LoggingDirectory => "logging.directory",
            ConfigKey::LoggingFile => "logging.file",
        }
    }

    /// Get the section name (e.g., "patch").
    pub fn section(&self) -> &'static str {
        self.name().split('.').next().unwrap_or("")
    }

    /// Get the key name within the section (e.g., "concurrency").
    pub fn key_name(&self) -> &'static str {
        self.name().split('.').nth(1).unwrap_or(self.name())
    }

    /// Get the value from a config file as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::ServerAuthAddress => config.server.auth_address.clone(),
            ConfigKey::ServerContentAddress => config.server.content_address.clone(),
            ConfigKey::ServerBuildId => config.server.build_id.to_string(),
            ConfigKey::ServerProduct => config.server.product.clone(),

            ConfigKey::PatchDestination => path_to_string(&config.patch.destination),
            ConfigKey::PatchConcurrency => config.patch.concurrency.to_string(),
            ConfigKey::PatchMaxRetries => config.patch.max_retries.to_string(),
            ConfigKey::PatchRetryBaseDelayMs => config.patch.retry_base_delay_ms.to_string(),
            ConfigKey::PatchRemoveExtraneous => config.patch.remove_extraneous.to_string(),

            ConfigKey::TransportIoWorkers => config.transport.io_workers.to_string(),
            ConfigKey::TransportConnectTimeout => config.transport.connect_timeout.to_string(),
            ConfigKey::TransportRequestTimeout => config.transport.request_timeout.to_string(),
            ConfigKey::TransportMaxConnectAttempts => {
                config.transport.max_connect_attempts.to_string()
            }

            ConfigKey::LoggingDirectory => path_to_string(&config.logging.directory),
            ConfigKey::LoggingFile => config.logging.file.clone(),
        }
    }

    /// Set the value in a config file.
    ///
    /// The value is validated with the same rules as the config file
    /// parser; on error the config is unchanged.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigKeyError> {
        self.apply(config, value.trim())
            .map_err(|e| self.validation_failed(e))
    }

    fn apply(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigFileError> {
        let (section, key) = (self.section(), self.key_name());
        match self {
            ConfigKey::ServerAuthAddress => {
                config.server.auth_address = parse_address(section, key, value)?;
            }
            ConfigKey::ServerContentAddress => {
                config.server.content_address = parse_address(section, key, value)?;
            }
            ConfigKey::ServerBuildId => {
                config.server.build_id =
                    parse_number(section, key, value, "must be a non-negative integer")?;
            }
            ConfigKey::ServerProduct => {
                config.server.product = non_empty(section, key, value)?.to_string();
            }

            ConfigKey::PatchDestination => {
                config.patch.destination = expand_tilde(non_empty(section, key, value)?);
            }
            ConfigKey::PatchConcurrency => {
                config.patch.concurrency = parse_positive(section, key, value)?;
            }
            ConfigKey::PatchMaxRetries => {
                config.patch.max_retries =
                    parse_number(section, key, value, "must be a non-negative integer")?;
            }
            ConfigKey::PatchRetryBaseDelayMs => {
                config.patch.retry_base_delay_ms =
                    parse_number(section, key, value, "must be a non-negative integer")?;
            }
            ConfigKey::PatchRemoveExtraneous => {
                config.patch.remove_extraneous = parse_bool(section, key, value)?;
            }

            ConfigKey::TransportIoWorkers => {
                config.transport.io_workers = parse_positive(section, key, value)?;
            }
            ConfigKey::TransportConnectTimeout => {
                config.transport.connect_timeout = parse_positive(section, key, value)?;
            }
            ConfigKey::TransportRequestTimeout => {
                config.transport.request_timeout = parse_positive(section, key, value)?;
            }
            ConfigKey::TransportMaxConnectAttempts => {
                config.transport.max_connect_attempts = parse_positive(section, key, value)?;
            }

            ConfigKey::LoggingDirectory => {
                config.logging.directory = expand_tilde(non_empty(section, key, value)?);
            }
            ConfigKey::LoggingFile => {
                config.logging.file = non_empty(section, key, value)?.to_string();
            }
        }
        Ok(())
    }

    fn validation_failed(&self, error: ConfigFileError) -> ConfigKeyError {
        let reason = match error {
            ConfigFileError::InvalidValue { reason, .. } => reason,
            other => other.to_string(),
        };
        ConfigKeyError::ValidationFailed {
            key: self.name().to_string(),
            reason,
        }
    }

    /// Get all supported configuration keys.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::ServerAuthAddress,
            ConfigKey::ServerContentAddress,
            ConfigKey::ServerBuildId,
            ConfigKey::ServerProduct,
            ConfigKey::PatchDestination,
            ConfigKey::PatchConcurrency,
            ConfigKey::PatchMaxRetries,
            ConfigKey::PatchRetryBaseDelayMs,
            ConfigKey::PatchRemoveExtraneous,
            ConfigKey::TransportIoWorkers,
            ConfigKey::TransportConnectTimeout,
            ConfigKey::TransportRequestTimeout,
            ConfigKey::TransportMaxConnectAttempts,
            ConfigKey::LoggingDirectory,
            ConfigKey::LoggingFile,
        ]
    }
}

fn non_empty<'a>(section: &str, key: &str, value: &'a str) -> Result<&'a str, ConfigFileError> {
    if value.is_empty() {
        return Err(ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}
