//! Common types and helpers shared across CLI commands.

use std::sync::Arc;

use clap::Args;
use patchlink::config::ConfigFile;
use patchlink::transport::{Endpoint, Transport};

/// Server selection shared by commands that talk to the network.
#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Server host:port for both manifests and payloads (overrides config)
    #[arg(long)]
    pub server: Option<String>,

    /// Product whose manifest is requested (overrides config)
    #[arg(long)]
    pub product: Option<String>,
}

/// Endpoint addresses and product after applying CLI overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub auth_address: String,
    pub content_address: String,
    pub product: String,
}

impl ServerArgs {
    /// CLI takes precedence, then config.
    pub fn resolve(&self, config: &ConfigFile) -> ResolvedServer {
        let (auth_address, content_address) = match &self.server {
            Some(server) => (server.clone(), server.clone()),
            None => (
                config.server.auth_address.clone(),
                config.server.content_address.clone(),
            ),
        };
        ResolvedServer {
            auth_address,
            content_address,
            product: self
                .product
                .clone()
                .unwrap_or_else(|| config.server.product.clone()),
        }
    }
}

/// Session pool for the resolved endpoints.
pub fn build_transport(config: &ConfigFile, server: &ResolvedServer) -> Arc<Transport> {
    Arc::new(
        Transport::new(config.transport_config())
            .with_endpoint(Endpoint::Auth, server.auth_address.clone())
            .with_endpoint(Endpoint::Content, server.content_address.clone()),
    )
}
