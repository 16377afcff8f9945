//! Manifest command - fetch and print a product's manifest.

use clap::Args;
use patchlink::config::ConfigFile;
use patchlink::manifest::{Manifest, ManifestClient};
use patchlink::runtime::build_runtime;

use super::common::{build_transport, ServerArgs};
use crate::error::CliError;

/// Arguments for `patchlink manifest`.
#[derive(Debug, Args)]
pub struct ManifestArgs {
    #[command(flatten)]
    pub server: ServerArgs,
}

/// Run the manifest command.
pub fn run(args: ManifestArgs, config: &ConfigFile) -> Result<(), CliError> {
    let server = args.server.resolve(config);
    let runtime = build_runtime(config.transport.io_workers).map_err(CliError::Runtime)?;

    let manifest = runtime.block_on(async {
        let transport = build_transport(config, &server);
        let result = ManifestClient::new(transport.clone())
            .request_manifest(&server.product)
            .await;
        transport.shutdown().await;
        result
    })?;

    print!("{}", render(&manifest));
    Ok(())
}

/// One line per file, then totals.
fn render(manifest: &Manifest) -> String {
    let mut out = String::new();
    for entry in manifest.entries() {
        out.push_str(&format!(
            "{}  {:>12}  {:>12}  {}\n",
            entry.checksum, entry.uncompressed_size, entry.compressed_size, entry.path
        ));
    }
    out.push_str(&format!(
        "{} file(s), {} bytes ({} compressed)\n",
        manifest.len(),
        manifest.total_uncompressed_size(),
        manifest.total_compressed_size()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchlink::checksum::ChecksumVerifier;
    use patchlink::manifest::ManifestEntry;

    #[test]
    fn test_render_lists_entries_and_totals() {
        let manifest = Manifest::new(vec![
            ManifestEntry::new("b.dat", ChecksumVerifier::compute(b"bb"), 10, 2),
            ManifestEntry::new("a.dat", ChecksumVerifier::compute(b"a"), 9, 1),
        ])
        .unwrap();

        let text = render(&manifest);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("a.dat"));
        assert!(lines[0].starts_with(&ChecksumVerifier::compute(b"a").to_hex()));
        assert_eq!(lines[2], "2 file(s), 3 bytes (19 compressed)");
    }
}
