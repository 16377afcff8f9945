//! INI serialization: `ConfigFile` → commented INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[server]
; Server that hands out manifests (host:port)
auth_address = {}
; Server that serves file payloads (host:port); often the same as auth_address
content_address = {}
; Client build announced during the handshake
build_id = {}
; Product whose manifest is requested
product = {}

[patch]
; Install root to keep up to date
destination = {}
; Files downloaded at once (default: 4)
concurrency = {}
; Retries per file after the first attempt (default: 3)
max_retries = {}
; Delay before the first retry in milliseconds; doubles per retry (default: 250)
retry_base_delay_ms = {}
; Delete local files the manifest does not list (default: false)
remove_extraneous = {}

[transport]
; Runtime threads driving socket I/O (default: 2)
io_workers = {}
; TCP connect timeout in seconds (default: 10)
connect_timeout = {}
; Handshake and per-reply timeout in seconds (default: 30)
request_timeout = {}
; TCP connect attempts before giving up (default: 5)
max_connect_attempts = {}

[logging]
; Directory for log files
directory = {}
; Log file name; truncated at the start of every session
file = {}
"#,
        config.server.auth_address,
        config.server.content_address,
        config.server.build_id,
        config.server.product,
        path_to_string(&config.patch.destination),
        config.patch.concurrency,
        config.patch.max_retries,
        config.patch.retry_base_delay_ms,
        config.patch.remove_extraneous,
        config.transport.io_workers,
        config.transport.connect_timeout,
        config.transport.request_timeout,
        config.transport.max_connect_attempts,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Path for display in the config file, collapsing the home dir to `~`.
pub(super) fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
