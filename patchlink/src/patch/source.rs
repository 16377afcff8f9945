//! Where compressed payloads come from.

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, trace};

use crate::manifest::ManifestEntry;
use crate::protocol::{result_code, FileDownloadChunk, FileDownloadRequest, Message};
use crate::session::{AuthError, Session};
use crate::transport::{Endpoint, Transport, TransportError};

/// Receives payload bytes in order.
pub trait ChunkSink: Send {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;
}

impl ChunkSink for Vec<u8> {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Why a fetch stopped early.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Non-OK result code from the server.
    #[error("server rejected download (result {0})")]
    Rejected(u32),

    /// The sink refused data.
    #[error("failed to store payload: {0}")]
    Sink(#[source] io::Error),
}

/// Streams a file's compressed payload into a sink.
pub trait PayloadSource: Send + Sync {
    /// Writes bytes `offset..compressed_size` of `entry`'s payload into
    /// `sink`, in order. Returns once the last byte has been written.
    fn fetch<'a>(
        &'a self,
        entry: &'a ManifestEntry,
        offset: u64,
        sink: &'a mut dyn ChunkSink,
    ) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// Downloads payloads from the content server.
pub struct TransportPayloadSource {
    transport: Arc<Transport>,
    endpoint: Endpoint,
}

impl TransportPayloadSource {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            endpoint: Endpoint::Content,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    async fn download(
        &self,
        entry: &ManifestEntry,
        offset: u64,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), FetchError> {
        let session = self.transport.session(self.endpoint).await?;

        let result = download_over(&session, entry, offset, sink).await;
        if let Err(FetchError::Transport(e)) = &result {
            if e.is_connection_lost() {
                self.transport.invalidate(self.endpoint, &session).await;
            }
        }
        result
    }
}

impl PayloadSource for TransportPayloadSource {
    fn fetch<'a>(
        &'a self,
        entry: &'a ManifestEntry,
        offset: u64,
        sink: &'a mut dyn ChunkSink,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(self.download(entry, offset, sink))
    }
}

fn protocol(message: impl Into<String>) -> FetchError {
    FetchError::Transport(TransportError::Protocol(message.into()))
}

async fn download_over(
    session: &Session,
    entry: &ManifestEntry,
    offset: u64,
    sink: &mut dyn ChunkSink,
) -> Result<(), FetchError> {
    let total = entry.compressed_size as u64;
    if offset >= total {
        return Ok(());
    }

    let mut txn = session.connection().open_transaction();
    let request = FileDownloadRequest {
        trans_id: txn.id(),
        path: entry.path.clone(),
        offset: u32::try_from(offset).map_err(|_| protocol("resume offset out of range"))?,
    };
    let frame = request.to_frame().map_err(|e| protocol(e.to_string()))?;

    debug!(
        path = %entry.path,
        offset,
        total,
        transaction = txn.id(),
        "Requesting payload"
    );
    txn.send(frame).await?;

    let mut expected = offset;
    while expected < total {
        let frame = txn.next_frame().await?;
        let chunk = FileDownloadChunk::from_frame(&frame).map_err(|e| protocol(e.to_string()))?;

        if chunk.result != result_code::OK {
            return Err(FetchError::Rejected(chunk.result));
        }
        if chunk.total_size as u64 != total {
            return Err(protocol(format!(
                "payload size {} does not match manifest size {total}",
                chunk.total_size
            )));
        }
        if chunk.offset as u64 != expected {
            return Err(protocol(format!(
                "chunk at offset {} where {expected} was expected",
                chunk.offset
            )));
        }
        if chunk.data.is_empty() {
            return Err(protocol("empty chunk before end of payload"));
        }
        if expected + chunk.data.len() as u64 > total {
            return Err(protocol("chunk runs past end of payload"));
        }

        sink.write_chunk(&chunk.data).map_err(FetchError::Sink)?;
        expected += chunk.data.len() as u64;
        trace!(path = %entry.path, received = expected, total, "Chunk received");
    }

    Ok(())
}
