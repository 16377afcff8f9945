//! Patch command - bring an install up to date.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use patchlink::config::ConfigFile;
use patchlink::manifest::ManifestClient;
use patchlink::patch::{LocalFs, PatchEngine, RemovalPolicy, RunError, TransportPayloadSource};
use patchlink::runtime::build_runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::{build_transport, ServerArgs};
use crate::error::CliError;
use crate::progress::PatchDisplay;

/// Arguments for `patchlink patch`.
#[derive(Debug, Args)]
pub struct PatchArgs {
    /// Install root to update (overrides config)
    #[arg(long)]
    pub dest: Option<PathBuf>,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Files downloaded at once (overrides config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Delete local files the manifest does not list
    #[arg(long)]
    pub remove_extraneous: bool,
}

/// Run the patch command.
pub fn run(args: PatchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let server = args.server.resolve(config);
    let root = args
        .dest
        .clone()
        .unwrap_or_else(|| config.patch.destination.clone());

    let mut patch_config = config.patch_config();
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(CliError::Config(
                "--concurrency must be at least 1".to_string(),
            ));
        }
        patch_config = patch_config.with_concurrency(concurrency);
    }
    if args.remove_extraneous {
        patch_config = patch_config.with_removal(RemovalPolicy::Remove);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, stopping after in-flight writes...");
            cancel.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
    }

    let runtime = build_runtime(config.transport.io_workers).map_err(CliError::Runtime)?;
    runtime.block_on(async {
        let transport = build_transport(config, &server);
        let manifests = ManifestClient::new(Arc::clone(&transport)).source(server.product.clone());
        let payloads = Arc::new(TransportPayloadSource::new(Arc::clone(&transport)));

        let display = PatchDisplay::new(&server.auth_address, &root.display().to_string());
        let engine = PatchEngine::new(patch_config, payloads, Arc::new(LocalFs))
            .with_progress(display.callback())
            .with_cancellation(cancel.clone());

        info!(product = %server.product, root = %root.display(), "Running patch");
        let result = engine.run(&manifests, &root).await;
        transport.shutdown().await;

        match result {
            Ok(report) => {
                display.finish(&report, false);
                Ok(())
            }
            Err(RunError::Incomplete(report)) => {
                display.finish(&report, cancel.is_cancelled());
                display.print_failures(&report);
                Err(CliError::Incomplete {
                    failed: report.failed_count(),
                    pending: report.unfinished_count() - report.failed_count(),
                })
            }
            Err(e) => {
                display.abandon();
                Err(CliError::Patch(e))
            }
        }
    })
}
