//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [server] section
    if let Some(section) = ini.section(Some("server")) {
        if let Some(v) = non_empty(section, "auth_address") {
            config.server.auth_address = parse_address("server", "auth_address", v)?;
        }
        if let Some(v) = non_empty(section, "content_address") {
            config.server.content_address = parse_address("server", "content_address", v)?;
        }
        if let Some(v) = section.get("build_id") {
            config.server.build_id =
                parse_number("server", "build_id", v, "must be a non-negative integer")?;
        }
        if let Some(v) = non_empty(section, "product") {
            config.server.product = v.to_string();
        }
    }

    // [patch] section
    if let Some(section) = ini.section(Some("patch")) {
        if let Some(v) = non_empty(section, "destination") {
            config.patch.destination = expand_tilde(v);
        }
        if let Some(v) = section.get("concurrency") {
            config.patch.concurrency = parse_positive("patch", "concurrency", v)?;
        }
        if let Some(v) = section.get("max_retries") {
            config.patch.max_retries =
                parse_number("patch", "max_retries", v, "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            config.patch.retry_base_delay_ms = parse_number(
                "patch",
                "retry_base_delay_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
        }
        if let Some(v) = section.get("remove_extraneous") {
            config.patch.remove_extraneous = parse_bool("patch", "remove_extraneous", v)?;
        }
    }

    // [transport] section
    if let Some(section) = ini.section(Some("transport")) {
        if let Some(v) = section.get("io_workers") {
            config.transport.io_workers = parse_positive("transport", "io_workers", v)?;
        }
        if let Some(v) = section.get("connect_timeout") {
            config.transport.connect_timeout = parse_positive("transport", "connect_timeout", v)?;
        }
        if let Some(v) = section.get("request_timeout") {
            config.transport.request_timeout = parse_positive("transport", "request_timeout", v)?;
        }
        if let Some(v) = section.get("max_connect_attempts") {
            config.transport.max_connect_attempts =
                parse_positive("transport", "max_connect_attempts", v)?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub(super) fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

pub(super) fn parse_positive<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    let n: T = parse_number(section, key, value, "must be a positive integer")?;
    if n <= T::default() {
        return Err(invalid(section, key, value, "must be a positive integer"));
    }
    Ok(n)
}

/// `host:port` with a numeric port.
pub(super) fn parse_address(section: &str, key: &str, value: &str) -> Result<String, ConfigFileError> {
    let valid = value
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !valid {
        return Err(invalid(section, key, value, "expected host:port"));
    }
    Ok(value.to_string())
}

pub(super) fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
