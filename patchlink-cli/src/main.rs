//! patchlink - keep a local install in sync with a patch server.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use patchlink::config::ConfigFile;
use patchlink::logging::init_logging;

use commands::config::ConfigCommands;
use commands::manifest::ManifestArgs;
use commands::patch::PatchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "patchlink")]
#[command(version, about = "Secure update client for file-based installs", long_about = None)]
struct Cli {
    /// Echo all log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create ~/.patchlink/config.ini with default settings
    Init,

    /// Bring the install root up to date with the server's manifest
    Patch(PatchArgs),

    /// Fetch and print the server's manifest
    Manifest(ManifestArgs),

    /// Print the checksum of local files
    Checksum {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// View or change configuration settings
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Checksum { files } => commands::checksum::run(&files),
        Commands::Config { command } => {
            commands::config::run(command.unwrap_or(ConfigCommands::List))
        }
        Commands::Patch(args) => {
            let config = ConfigFile::load()?;
            let _guard = start_logging(&config, cli.verbose)?;
            commands::patch::run(args, &config)
        }
        Commands::Manifest(args) => {
            let config = ConfigFile::load()?;
            let _guard = start_logging(&config, cli.verbose)?;
            commands::manifest::run(args, &config)
        }
    }
}

fn start_logging(
    config: &ConfigFile,
    verbose: bool,
) -> Result<patchlink::logging::LoggingGuard, CliError> {
    init_logging(&config.logging.directory, &config.logging.file, verbose)
        .map_err(|e| CliError::LoggingInit(e.to_string()))
}
