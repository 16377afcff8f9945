//! Checksum command - print file checksums in `md5sum` format.

use std::path::PathBuf;

use patchlink::checksum::ChecksumVerifier;

use crate::error::CliError;

/// Run the checksum command.
pub fn run(files: &[PathBuf]) -> Result<(), CliError> {
    for path in files {
        let checksum = ChecksumVerifier::compute_file(path).map_err(|error| CliError::Checksum {
            path: path.clone(),
            error,
        })?;
        println!("{}  {}", checksum, path.display());
    }
    Ok(())
}
