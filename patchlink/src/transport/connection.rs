//! A secured connection driven by a single actor task.
//!
//! # Architecture
//!
//! ```text
//!  Transaction ──┐                                ┌──► Transaction inbox (id 1)
//!  Transaction ──┼─► command channel ─► actor ────┼──► Transaction inbox (id 2)
//!  Connection  ──┘      (Send)          │  ▲      └──► (unknown id: dropped)
//!                                       ▼  │
//!                                Framed<IO, FrameCodec>
//! ```
//!
//! The actor owns the socket. Outbound frames arrive as commands; inbound
//! frames are routed by the transaction id in their first four payload
//! bytes. When the actor stops, for whatever reason, the connection moves
//! to [`ConnectionState::Closed`], every queued send resolves with
//! [`TransportError::Canceled`] and every open transaction receives a
//! terminal error. Nothing is left waiting on a dead socket.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::config::TransportConfig;
use super::error::{TransportError, TransportResult};
use super::frame::{Frame, FrameCodec};

/// Capacity of the outbound command queue.
const COMMAND_CAPACITY: usize = 64;

/// Lifecycle of a connection.
///
/// `Connecting` and `Handshaking` are only observed by the negotiator; a
/// [`Connection`] handle starts life `Secured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Secured,
    Closed,
}

/// Why the actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Local,
    Peer,
}

impl CloseReason {
    fn to_error(self) -> TransportError {
        match self {
            CloseReason::Local => TransportError::Canceled,
            CloseReason::Peer => TransportError::Reset,
        }
    }
}

type Route = mpsc::UnboundedSender<TransportResult<Frame>>;

#[derive(Default)]
struct RouteTable {
    open: HashMap<u32, Route>,
    closed: Option<CloseReason>,
}

struct Shared {
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    routes: Mutex<RouteTable>,
    next_transaction: AtomicU32,
    cancel: CancellationToken,
}

impl Shared {
    fn route(&self, frame: Frame) {
        let Some(id) = frame.transaction_id() else {
            warn!(
                peer = %self.peer,
                msg_type = frame.msg_type,
                "Dropping frame without transaction id"
            );
            return;
        };

        let table = self.routes.lock();
        match table.open.get(&id) {
            Some(route) => {
                let _ = route.send(Ok(frame));
            }
            None => debug!(peer = %self.peer, transaction = id, "No subscriber; dropping frame"),
        }
    }

    fn teardown(&self, reason: CloseReason, commands: &mut mpsc::Receiver<Command>) {
        *self.state.lock() = ConnectionState::Closed;
        self.cancel.cancel();

        let routes = {
            let mut table = self.routes.lock();
            table.closed = Some(reason);
            std::mem::take(&mut table.open)
        };
        for route in routes.into_values() {
            let _ = route.send(Err(reason.to_error()));
        }

        commands.close();
        while let Ok(Command::Send { done, .. }) = commands.try_recv() {
            let _ = done.send(Err(TransportError::Canceled));
        }

        debug!(peer = %self.peer, ?reason, "Connection closed");
    }
}

enum Command {
    Send {
        frame: Frame,
        done: oneshot::Sender<TransportResult<()>>,
    },
}

/// Cloneable handle to a secured connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    request_timeout: Duration,
}

impl Connection {
    /// Hands a secured framed stream to a new actor task.
    pub fn spawn<T>(
        framed: Framed<T, FrameCodec>,
        peer: SocketAddr,
        request_timeout: Duration,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let shared = Arc::new(Shared {
            peer,
            state: Mutex::new(ConnectionState::Secured),
            routes: Mutex::new(RouteTable::default()),
            next_transaction: AtomicU32::new(1),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_actor(framed, rx, Arc::clone(&shared)));

        Self {
            shared,
            commands,
            request_timeout,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_open(&self) -> bool {
        !self.shared.cancel.is_cancelled() && self.state() != ConnectionState::Closed
    }

    /// Whether two handles refer to the same underlying connection.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queues a frame and waits until it has been written to the socket.
    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { frame, done })
            .await
            .map_err(|_| TransportError::Canceled)?;
        rx.await.unwrap_or(Err(TransportError::Canceled))
    }

    /// Opens a transaction with a fresh id and registers its inbox.
    pub fn open_transaction(&self) -> Transaction {
        let id = self.shared.next_transaction.fetch_add(1, Ordering::Relaxed);
        let (tx, inbox) = mpsc::unbounded_channel();

        {
            let mut table = self.shared.routes.lock();
            match table.closed {
                Some(reason) => {
                    let _ = tx.send(Err(reason.to_error()));
                }
                None => {
                    table.open.insert(id, tx);
                }
            }
        }

        Transaction {
            id,
            connection: self.clone(),
            inbox,
        }
    }

    /// Closes the connection, canceling everything in flight.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// A request/reply exchange on a connection.
///
/// Frames addressed to this transaction's id are delivered to
/// [`next_frame`](Self::next_frame). Dropping the transaction unregisters
/// it; late frames for it are discarded.
pub struct Transaction {
    id: u32,
    connection: Connection,
    inbox: mpsc::UnboundedReceiver<TransportResult<Frame>>,
}

impl Transaction {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        self.connection.send(frame).await
    }

    /// Waits for the next frame addressed to this transaction.
    pub async fn next_frame(&mut self) -> TransportResult<Frame> {
        let limit = self.connection.request_timeout;
        match timeout(limit, self.inbox.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(TransportError::Canceled),
            Err(_) => Err(TransportError::Timeout {
                operation: "transaction reply",
                timeout: limit,
            }),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.connection.shared.routes.lock().open.remove(&self.id);
    }
}

async fn run_actor<T>(
    mut framed: Framed<T, FrameCodec>,
    mut commands: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let reason = loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => break CloseReason::Local,

            command = commands.recv() => match command {
                Some(Command::Send { frame, done }) => {
                    trace!(peer = %shared.peer, msg_type = frame.msg_type, len = frame.payload.len(), "Sending frame");
                    let result = framed.send(frame).await;
                    let failed = result.is_err();
                    if let Err(ref e) = result {
                        warn!(peer = %shared.peer, error = %e, "Write failed");
                    }
                    let _ = done.send(result);
                    if failed {
                        break CloseReason::Peer;
                    }
                }
                // Every handle is gone
                None => break CloseReason::Local,
            },

            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => shared.route(frame),
                Some(Err(e)) => {
                    warn!(peer = %shared.peer, error = %e, "Read failed");
                    break CloseReason::Peer;
                }
                None => {
                    debug!(peer = %shared.peer, "Peer closed connection");
                    break CloseReason::Peer;
                }
            },
        }
    };

    shared.teardown(reason, &mut commands);
}

/// Opens a TCP connection, retrying per the reconnect policy.
///
/// Only the TCP connect is retried here; callers decide what to do when
/// the handshake on top of it fails.
pub async fn dial(addr: &str, config: &TransportConfig) -> TransportResult<TcpStream> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let reason = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(addr, error = %e, "Failed to set TCP_NODELAY");
                }
                debug!(addr, attempt, "TCP connected");
                return Ok(stream);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {:?}", config.connect_timeout),
        };

        match config.reconnect.delay_for_attempt(attempt) {
            Some(delay) => {
                warn!(addr, attempt, ?delay, reason = %reason, "Connect failed, retrying");
                sleep(delay).await;
            }
            None => {
                return Err(TransportError::Unreachable {
                    addr: addr.to_string(),
                    attempts: attempt,
                    reason,
                })
            }
        }
    }
}
