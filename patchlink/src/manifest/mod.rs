//! Server manifests: what files an install should contain.
//!
//! - [`Manifest`] / [`ManifestEntry`]: the validated file list and its encoding
//! - [`ManifestClient`]: requests a product's manifest over a secured session
//! - [`ManifestSource`]: where the patch engine gets its manifest from

mod client;
mod error;
mod types;

pub use client::{ManifestClient, ManifestSource, RemoteManifest};
pub use error::{ManifestError, ManifestResult};
pub use types::{validate_path, Manifest, ManifestEntry, STATE_DIR};
