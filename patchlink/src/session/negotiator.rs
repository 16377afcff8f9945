//! Client side of the key-agreement handshake.
//!
//! # Handshake
//!
//! ```text
//!   client                                   server
//!     │ ── ClientHello {version, build} ──────► │
//!     │ ◄───────── ServerHello {B, nonce} ───── │   or HandshakeReject
//!     │                                         │
//!     │  K = B^X mod N                          │  K = A^b mod N
//!     │  keys = derive(K, nonce)                │  keys = derive(K, nonce)
//!     │ ◄═════════ encrypted frames ══════════► │
//! ```
//!
//! The handshake runs on the framed stream directly, before the
//! connection actor exists. Keys are installed into the codec in place, so
//! any bytes the server pipelined behind its hello decode correctly.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::error::{AuthError, AuthResult};
use super::keys::{Role, SessionKeys};
use super::params::DomainParameters;
use crate::protocol::{
    ClientHello, HandshakeReject, Message, MessageType, ServerHello, REJECT_VERSION_MISMATCH,
};
use crate::transport::{dial, Connection, ConnectionState, FrameCodec, TransportConfig, TransportError};

/// A secured connection plus what was agreed while opening it.
#[derive(Clone)]
pub struct Session {
    connection: Connection,
    fingerprint: Arc<str>,
}

impl Session {
    pub fn new(connection: Connection, fingerprint: impl Into<Arc<str>>) -> Self {
        Self {
            connection,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn peer(&self) -> SocketAddr {
        self.connection.peer()
    }

    /// Non-secret identifier of the session keys.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    /// Whether both handles share one connection.
    pub fn same_as(&self, other: &Session) -> bool {
        self.connection.same_as(&other.connection)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer())
            .field("fingerprint", &self.fingerprint)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens secured sessions.
#[derive(Debug, Clone)]
pub struct SessionNegotiator {
    config: TransportConfig,
    params: Arc<DomainParameters>,
}

impl SessionNegotiator {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            params: Arc::new(DomainParameters::global().clone()),
        }
    }

    /// Uses different domain parameters than the embedded ones.
    pub fn with_parameters(mut self, params: DomainParameters) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Dials `addr` and runs the handshake.
    ///
    /// TCP connects are retried per the reconnect policy; a failed
    /// handshake is returned as-is.
    pub async fn connect(&self, addr: &str) -> AuthResult<Session> {
        debug!(addr, state = ?ConnectionState::Connecting, "Opening session");
        let stream = dial(addr, &self.config).await?;
        let peer = stream.peer_addr().map_err(TransportError::from)?;
        self.negotiate(stream, peer).await
    }

    /// Runs the handshake over an already-open stream.
    pub async fn negotiate<T>(&self, io: T, peer: SocketAddr) -> AuthResult<Session>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!(%peer, state = ?ConnectionState::Handshaking, "Starting handshake");
        let mut framed = Framed::new(io, FrameCodec::new());

        let hello = ClientHello {
            protocol_version: self.config.protocol_version,
            build_id: self.config.build_id,
        };
        let frame = hello
            .to_frame()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        framed.send(frame).await?;

        let limit = self.config.request_timeout;
        let reply = match timeout(limit, framed.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => return Err(TransportError::Reset.into()),
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "handshake",
                    timeout: limit,
                }
                .into())
            }
        };

        let server_hello = match MessageType::from_code(reply.msg_type) {
            Some(MessageType::ServerHello) => ServerHello::from_frame(&reply)
                .map_err(|e| AuthError::KeyAgreementFailed(e.to_string()))?,
            Some(MessageType::HandshakeReject) => {
                let reject = HandshakeReject::from_frame(&reply)
                    .map_err(|e| AuthError::KeyAgreementFailed(e.to_string()))?;
                return Err(self.rejected(reject));
            }
            _ => {
                return Err(AuthError::KeyAgreementFailed(format!(
                    "unexpected message type {:#06x} during handshake",
                    reply.msg_type
                )))
            }
        };

        let keys = self.agree(&server_hello)?;
        framed.codec_mut().install(&keys, Role::Client);

        let fingerprint = keys.fingerprint();
        info!(%peer, fingerprint = %fingerprint, "Session secured");

        let connection = Connection::spawn(framed, peer, self.config.request_timeout);
        Ok(Session::new(connection, fingerprint))
    }

    fn agree(&self, hello: &ServerHello) -> AuthResult<SessionKeys> {
        let server_public = self.params.decode_value(&hello.public_value);
        let shared = self.params.shared_secret(&server_public).ok_or_else(|| {
            AuthError::KeyAgreementFailed("server public value outside [2, N-2]".to_string())
        })?;
        Ok(SessionKeys::derive(
            &self.params.encode_value(&shared),
            &hello.nonce,
        ))
    }

    fn rejected(&self, reject: HandshakeReject) -> AuthError {
        if reject.reason == REJECT_VERSION_MISMATCH {
            AuthError::VersionMismatch {
                client: self.config.protocol_version,
                server: reject.server_version,
            }
        } else {
            AuthError::KeyAgreementFailed(format!(
                "server rejected handshake (reason {})",
                reject.reason
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NONCE_LEN;
    use crate::transport::Frame;
    use num_bigint::BigUint;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const NONCE: [u8; NONCE_LEN] = [5u8; NONCE_LEN];

    fn peer() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn read_hello(framed: &mut Framed<DuplexStream, FrameCodec>) -> ClientHello {
        ClientHello::from_frame(&framed.next().await.unwrap().unwrap()).unwrap()
    }

    /// Server half of the handshake with exponent `b`; returns the secured
    /// framed stream.
    async fn serve(io: DuplexStream, b: BigUint) -> Framed<DuplexStream, FrameCodec> {
        let params = DomainParameters::global();
        let mut framed = Framed::new(io, FrameCodec::new());
        read_hello(&mut framed).await;

        let server_public = params.generator().modpow(&b, params.modulus());
        let hello = ServerHello {
            public_value: params.encode_value(&server_public).try_into().unwrap(),
            nonce: NONCE,
        };
        framed.send(hello.to_frame().unwrap()).await.unwrap();

        let k = params.client_public_value().modpow(&b, params.modulus());
        let keys = SessionKeys::derive(&params.encode_value(&k), &NONCE);
        framed.codec_mut().install(&keys, Role::Server);
        framed
    }

    #[tokio::test]
    async fn test_handshake_secures_both_directions() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut framed = serve(server_io, BigUint::from(123_456_789u64)).await;
            // Echo one frame back
            let frame = framed.next().await.unwrap().unwrap();
            framed.send(frame).await.unwrap();
        });

        let negotiator = SessionNegotiator::new(TransportConfig::default());
        let session = negotiator.negotiate(client_io, peer()).await.unwrap();
        assert!(session.is_open());

        let mut txn = session.connection().open_transaction();
        let mut payload = txn.id().to_le_bytes().to_vec();
        payload.extend_from_slice(b"ping");
        txn.send(Frame::new(0x0010, payload.clone())).await.unwrap();

        let echoed = txn.next_frame().await.unwrap();
        assert_eq!(&echoed.payload[..], &payload[..]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_degenerate_server_value_fails_agreement() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec::new());
            read_hello(&mut framed).await;
            let mut public_value = [0u8; crate::session::KEY_BYTES];
            public_value[crate::session::KEY_BYTES - 1] = 1;
            let hello = ServerHello {
                public_value,
                nonce: NONCE,
            };
            framed.send(hello.to_frame().unwrap()).await.unwrap();
            // Hold the stream open until the client gives up
            let _ = framed.next().await;
        });

        let negotiator = SessionNegotiator::new(TransportConfig::default());
        let err = negotiator.negotiate(client_io, peer()).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyAgreementFailed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec::new());
            read_hello(&mut framed).await;
            let reject = HandshakeReject {
                reason: REJECT_VERSION_MISMATCH,
                server_version: 7,
            };
            framed.send(reject.to_frame().unwrap()).await.unwrap();
        });

        let negotiator = SessionNegotiator::new(TransportConfig::default().with_protocol_version(1));
        match negotiator.negotiate(client_io, peer()).await {
            Err(AuthError::VersionMismatch { client, server }) => {
                assert_eq!(client, 1);
                assert_eq!(server, 7);
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_hangup_is_unreachable() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, FrameCodec::new());
            read_hello(&mut framed).await;
        });

        let negotiator = SessionNegotiator::new(TransportConfig::default());
        let err = negotiator.negotiate(client_io, peer()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unreachable(TransportError::Reset)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client_io, _server_io) = tokio::io::duplex(64 * 1024);
        let config = TransportConfig::default().with_request_timeout(Duration::from_millis(50));

        let err = SessionNegotiator::new(config)
            .negotiate(client_io, peer())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Unreachable(TransportError::Timeout { .. })
        ));
    }
}
