//! Manifest retrieval over a secured session.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use super::error::{ManifestError, ManifestResult};
use super::types::Manifest;
use crate::protocol::{result_code, ManifestReply, ManifestRequest, Message};
use crate::session::Session;
use crate::transport::{Endpoint, Transport, TransportError};

/// Anything that can produce the manifest for a patch run.
pub trait ManifestSource: Send + Sync {
    fn manifest(&self) -> BoxFuture<'_, ManifestResult<Manifest>>;
}

/// A manifest already in hand.
impl ManifestSource for Manifest {
    fn manifest(&self) -> BoxFuture<'_, ManifestResult<Manifest>> {
        let manifest = self.clone();
        Box::pin(async move { Ok(manifest) })
    }
}

/// Requests manifests from a server endpoint.
#[derive(Clone)]
pub struct ManifestClient {
    transport: Arc<Transport>,
    endpoint: Endpoint,
}

impl ManifestClient {
    /// Client that asks the [`Endpoint::Auth`] server.
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            endpoint: Endpoint::Auth,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Fetches and validates the manifest for `product`.
    ///
    /// A session that fails mid-request is evicted from the pool so the
    /// next call reconnects.
    pub async fn request_manifest(&self, product: &str) -> ManifestResult<Manifest> {
        let session = self.transport.session(self.endpoint).await?;

        let result = self.fetch(&session, product).await;
        if let Err(ManifestError::Transport(e)) = &result {
            if e.is_connection_lost() {
                self.transport.invalidate(self.endpoint, &session).await;
            }
        }
        result
    }

    /// A [`ManifestSource`] bound to one product.
    pub fn source(&self, product: impl Into<String>) -> RemoteManifest {
        RemoteManifest {
            client: self.clone(),
            product: product.into(),
        }
    }

    async fn fetch(&self, session: &Session, product: &str) -> ManifestResult<Manifest> {
        let mut txn = session.connection().open_transaction();
        let request = ManifestRequest {
            trans_id: txn.id(),
            product: product.to_string(),
        };
        let frame = request
            .to_frame()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        debug!(product, transaction = txn.id(), "Requesting manifest");
        txn.send(frame).await?;

        let reply = txn.next_frame().await?;
        let reply = ManifestReply::from_frame(&reply)
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;

        if reply.result != result_code::OK {
            return Err(ManifestError::Rejected {
                product: product.to_string(),
                code: reply.result,
            });
        }

        let manifest = Manifest::decode(&reply.body)?;
        info!(
            product,
            files = manifest.len(),
            bytes = manifest.total_compressed_size(),
            "Manifest received"
        );
        Ok(manifest)
    }
}

/// [`ManifestClient`] bound to a product.
#[derive(Clone)]
pub struct RemoteManifest {
    client: ManifestClient,
    product: String,
}

impl RemoteManifest {
    pub fn product(&self) -> &str {
        &self.product
    }
}

impl ManifestSource for RemoteManifest {
    fn manifest(&self) -> BoxFuture<'_, ManifestResult<Manifest>> {
        Box::pin(self.client.request_manifest(&self.product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumVerifier;
    use crate::manifest::ManifestEntry;
    use crate::transport::TransportConfig;

    #[tokio::test]
    async fn test_in_memory_manifest_source() {
        let manifest = Manifest::new(vec![ManifestEntry::new(
            "a.dat",
            ChecksumVerifier::compute(b"a"),
            1,
            1,
        )])
        .unwrap();

        let source: &dyn ManifestSource = &manifest;
        assert_eq!(source.manifest().await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_unconfigured_endpoint_surfaces_auth_error() {
        let transport = Arc::new(Transport::new(TransportConfig::default()));
        let source = ManifestClient::new(transport).source("Teledahn");
        assert_eq!(source.product(), "Teledahn");

        let err = source.manifest().await.unwrap_err();
        assert!(matches!(err, ManifestError::Auth(_)));
    }
}
