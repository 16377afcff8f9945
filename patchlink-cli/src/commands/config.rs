//! `patchlink config` - view and edit `~/.patchlink/config.ini`.

use std::path::Path;

use clap::Subcommand;
use patchlink::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one value
    Get {
        /// Key as section.key (e.g. patch.concurrency)
        key: String,
    },

    /// Change one value and save the file
    Set {
        /// Key as section.key (e.g. server.auth_address)
        key: String,

        /// New value
        value: String,
    },

    /// Print every setting
    List,

    /// Print the configuration file path
    Path,
}

/// Run a config subcommand against the default config file.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path();
    match command {
        ConfigCommands::Get { key } => {
            println!("{}", get_value(&path, &key)?);
        }
        ConfigCommands::Set { key, value } => {
            let name = set_value(&path, &key, &value)?;
            println!("Set {} = {}", name, value.trim());
        }
        ConfigCommands::List => {
            print!("{}", render_list(&load_or_default(&path)));
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'patchlink config list' to see available keys.",
            key
        ))
    })
}

fn load_or_default(path: &Path) -> ConfigFile {
    ConfigFile::load_from(path).unwrap_or_default()
}

fn get_value(path: &Path, key: &str) -> Result<String, CliError> {
    let key = parse_key(key)?;
    Ok(key.get(&load_or_default(path)))
}

/// Returns the canonical key name on success.
fn set_value(path: &Path, key: &str, value: &str) -> Result<&'static str, CliError> {
    let key = parse_key(key)?;
    let mut config = load_or_default(path);
    key.set(&mut config, value)
        .map_err(|e| CliError::Config(e.to_string()))?;
    config.save_to(path)?;
    Ok(key.name())
}

fn render_list(config: &ConfigFile) -> String {
    let mut out = String::new();
    let mut current_section = "";

    for key in ConfigKey::all() {
        let section = key.section();
        if section != current_section {
            if !current_section.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", section));
            current_section = section;
        }
        out.push_str(&format!("  {} = {}\n", key.key_name(), key.get(config)));
    }
    out
}
