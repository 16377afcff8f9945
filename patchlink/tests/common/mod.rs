//! In-process patch server for integration tests.
//!
//! Speaks the real handshake and encrypted framing over loopback TCP and
//! serves one manifest plus zlib payloads. Fault switches in
//! [`ServerOptions`] drive the failure-path tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use num_bigint::BigUint;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use patchlink::checksum::ChecksumVerifier;
use patchlink::manifest::{Manifest, ManifestEntry};
use patchlink::protocol::{
    result_code, ClientHello, FileDownloadChunk, FileDownloadRequest, HandshakeReject,
    ManifestReply, ManifestRequest, Message, MessageType, ServerHello, REJECT_VERSION_MISMATCH,
};
use patchlink::session::{DomainParameters, Role, SessionKeys, NONCE_LEN};
use patchlink::transport::{
    Endpoint, FrameCodec, RetryPolicy, Transport, TransportConfig, TransportError,
};

pub const PRODUCT: &str = "client";
pub const SERVER_VERSION: u32 = 1;

/// Fault switches.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bytes per download chunk.
    pub chunk_size: usize,
    /// Reject every handshake, announcing this version.
    pub reject_version: Option<u32>,
    /// Answer the handshake with public value 1.
    pub degenerate_public_value: bool,
    /// Flip a byte of the manifest list checksum.
    pub corrupt_manifest: bool,
    /// Close the connection once this many payload bytes were sent on it.
    pub drop_after: Option<usize>,
    /// How many connections `drop_after` applies to.
    pub drops: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            reject_version: None,
            degenerate_public_value: false,
            corrupt_manifest: false,
            drop_after: None,
            drops: 0,
        }
    }
}

/// Everything the server observed.
#[derive(Default)]
pub struct ServerStats {
    pub connections: AtomicUsize,
    pub manifest_requests: AtomicUsize,
    pub downloads: Mutex<Vec<(String, u32)>>,
}

impl ServerStats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn manifest_requests(&self) -> usize {
        self.manifest_requests.load(Ordering::SeqCst)
    }

    /// Offsets requested for `path`, in arrival order.
    pub fn offsets(&self, path: &str) -> Vec<u32> {
        self.downloads
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().len()
    }
}

struct ServerState {
    manifest: Manifest,
    payloads: HashMap<String, Bytes>,
    options: ServerOptions,
    drops_left: AtomicUsize,
    stats: Arc<ServerStats>,
}

pub struct TestServer {
    addr: SocketAddr,
    stats: Arc<ServerStats>,
    manifest: Manifest,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Serves `files` as `(path, content)` pairs.
    pub async fn start(files: &[(&str, &[u8])], options: ServerOptions) -> Self {
        let mut entries = Vec::new();
        let mut payloads = HashMap::new();
        for (path, content) in files {
            let payload = compress(content);
            entries.push(ManifestEntry::new(
                *path,
                ChecksumVerifier::compute(content),
                payload.len() as u32,
                content.len() as u32,
            ));
            payloads.insert(path.to_string(), Bytes::from(payload));
        }
        Self::with_manifest(Manifest::new(entries).unwrap(), payloads, options).await
    }

    /// Serves an explicit manifest; entries without a payload answer
    /// `NOT_FOUND`.
    pub async fn with_manifest(
        manifest: Manifest,
        payloads: HashMap<String, Bytes>,
        options: ServerOptions,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ServerStats::default());

        let state = Arc::new(ServerState {
            manifest: manifest.clone(),
            payloads,
            drops_left: AtomicUsize::new(options.drops),
            options,
            stats: Arc::clone(&stats),
        });

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, state).await;
                });
            }
        });

        Self {
            addr,
            stats,
            manifest,
            task,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Transport with both endpoints pointed at this server.
    pub fn transport(&self) -> Arc<Transport> {
        Arc::new(
            Transport::new(test_transport_config())
                .with_endpoint(Endpoint::Auth, self.addr())
                .with_endpoint(Endpoint::Content, self.addr()),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn test_transport_config() -> TransportConfig {
    TransportConfig::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(5))
        .with_reconnect(RetryPolicy::fixed(2, Duration::from_millis(10)))
}

pub fn compress(content: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

/// Deterministic, poorly compressible content.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn protocol(e: impl ToString) -> TransportError {
    TransportError::Protocol(e.to_string())
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), TransportError> {
    let connection = state.stats.connections.fetch_add(1, Ordering::SeqCst);
    let mut framed = Framed::new(stream, FrameCodec::new());

    let Some(frame) = framed.next().await else {
        return Ok(());
    };
    ClientHello::from_frame(&frame?).map_err(protocol)?;

    if let Some(server_version) = state.options.reject_version {
        let reject = HandshakeReject {
            reason: REJECT_VERSION_MISMATCH,
            server_version,
        };
        framed.send(reject.to_frame().map_err(protocol)?).await?;
        return Ok(());
    }

    let params = DomainParameters::global();
    let nonce = [connection as u8 ^ 0x5a; NONCE_LEN];
    let secret = BigUint::from(0x1234_5678_9abc_u64 + connection as u64);

    let public = if state.options.degenerate_public_value {
        BigUint::from(1u32)
    } else {
        params.generator().modpow(&secret, params.modulus())
    };
    let hello = ServerHello {
        public_value: params.encode_value(&public).try_into().map_err(|_| protocol("public value width"))?,
        nonce,
    };
    framed.send(hello.to_frame().map_err(protocol)?).await?;
    if state.options.degenerate_public_value {
        // Client aborts; wait for it to hang up
        while framed.next().await.is_some() {}
        return Ok(());
    }

    let shared = params.client_public_value().modpow(&secret, params.modulus());
    let keys = SessionKeys::derive(&params.encode_value(&shared), &nonce);
    framed.codec_mut().install(&keys, Role::Server);

    let mut sent_on_connection = 0usize;
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match MessageType::from_code(frame.msg_type) {
            Some(MessageType::ManifestRequest) => {
                let request = ManifestRequest::from_frame(&frame).map_err(protocol)?;
                state.stats.manifest_requests.fetch_add(1, Ordering::SeqCst);
                let reply = manifest_reply(&state, request);
                framed.send(reply.to_frame().map_err(protocol)?).await?;
            }
            Some(MessageType::FileDownloadRequest) => {
                let request = FileDownloadRequest::from_frame(&frame).map_err(protocol)?;
                state
                    .stats
                    .downloads
                    .lock()
                    .push((request.path.clone(), request.offset));

                let Some(payload) = state.payloads.get(&request.path) else {
                    let chunk = FileDownloadChunk {
                        trans_id: request.trans_id,
                        result: result_code::NOT_FOUND,
                        total_size: 0,
                        offset: request.offset,
                        data: Bytes::new(),
                    };
                    framed.send(chunk.to_frame().map_err(protocol)?).await?;
                    continue;
                };

                let mut offset = request.offset as usize;
                while offset < payload.len() {
                    let end = (offset + state.options.chunk_size).min(payload.len());
                    let chunk = FileDownloadChunk {
                        trans_id: request.trans_id,
                        result: result_code::OK,
                        total_size: payload.len() as u32,
                        offset: offset as u32,
                        data: payload.slice(offset..end),
                    };
                    framed.send(chunk.to_frame().map_err(protocol)?).await?;
                    sent_on_connection += end - offset;
                    offset = end;

                    if should_drop(&state, sent_on_connection) {
                        return Ok(());
                    }
                }
            }
            _ => return Err(protocol("unexpected message")),
        }
    }
    Ok(())
}

fn manifest_reply(state: &ServerState, request: ManifestRequest) -> ManifestReply {
    if request.product != PRODUCT {
        return ManifestReply {
            trans_id: request.trans_id,
            result: result_code::NOT_FOUND,
            body: Bytes::new(),
        };
    }

    let mut body = state.manifest.encode().unwrap().to_vec();
    if state.options.corrupt_manifest {
        if let Some(last) = body.last_mut() {
            *last ^= 0xff;
        }
    }
    ManifestReply {
        trans_id: request.trans_id,
        result: result_code::OK,
        body: Bytes::from(body),
    }
}

fn should_drop(state: &ServerState, sent: usize) -> bool {
    match state.options.drop_after {
        Some(limit) if sent >= limit => state
            .drops_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok(),
        _ => false,
    }
}
