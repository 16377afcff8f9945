//! User configuration.
//!
//! `~/.patchlink/config.ini` is loaded into a [`ConfigFile`], which hands
//! typed configs to the library components:
//!
//! ```
//! use patchlink::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let transport = config.transport_config();
//! let patch = config.patch_config();
//! assert_eq!(patch.concurrency, 4);
//! assert_eq!(transport.build_id, 1);
//! ```

mod defaults;
mod file;
mod keys;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    default_destination, default_log_directory, DEFAULT_BUILD_ID, DEFAULT_IO_WORKERS,
    DEFAULT_LOG_FILE, DEFAULT_PRODUCT, DEFAULT_SERVER_ADDRESS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use keys::{ConfigKey, ConfigKeyError};
pub use settings::{ConfigFile, LoggingSettings, PatchSettings, ServerSettings, TransportSettings};
