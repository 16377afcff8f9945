//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use patchlink::config::ConfigFileError;
use patchlink::manifest::ManifestError;
use patchlink::patch::RunError;
use patchlink::session::AuthError;
use patchlink::transport::TransportError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to read or write the config file
    ConfigFile(ConfigFileError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Failed to fetch a manifest
    Manifest(ManifestError),
    /// A patch run stopped before comparing files
    Patch(RunError),
    /// A patch run finished with files not updated
    Incomplete { failed: usize, pending: usize },
    /// Failed to hash a file
    Checksum { path: PathBuf, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let Some(TransportError::Unreachable { .. }) = self.transport_error() {
            eprintln!();
            eprintln!("Check that:");
            eprintln!("  1. server.auth_address and server.content_address are correct");
            eprintln!("  2. The patch server is running and reachable from this machine");
            eprintln!("  Run 'patchlink config list' to see the effective settings.");
        }
        if let CliError::Incomplete { .. } = self {
            eprintln!();
            eprintln!("Run 'patchlink patch' again to retry; partial downloads are resumed.");
        }

        process::exit(1)
    }

    fn transport_error(&self) -> Option<&TransportError> {
        let manifest = match self {
            CliError::Manifest(e) => e,
            CliError::Patch(RunError::Manifest(e)) => e,
            _ => return None,
        };
        match manifest {
            ManifestError::Transport(e) => Some(e),
            ManifestError::Auth(AuthError::Unreachable(e)) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Manifest(e) => write!(f, "Failed to fetch manifest: {}", e),
            CliError::Patch(e) => write!(f, "Update failed: {}", e),
            CliError::Incomplete { failed, pending } => write!(
                f,
                "Update incomplete: {} file(s) failed, {} not attempted",
                failed, pending
            ),
            CliError::Checksum { path, error } => {
                write!(f, "Failed to read '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Manifest(e) => Some(e),
            CliError::Patch(e) => Some(e),
            CliError::Checksum { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        CliError::Manifest(e)
    }
}
