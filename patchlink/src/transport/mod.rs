//! Framed, encrypted transport over TCP.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   session(endpoint)   ┌──────────────────┐
//! │ Transport  │ ────────────────────► │ SessionNegotiator│ ── dial + handshake
//! │ (pool)     │ ◄──── Session ─────── └──────────────────┘
//! └─────┬──────┘
//!       │ one live Session per Endpoint
//!       ▼
//! ┌────────────┐  commands   ┌───────┐  Framed<TcpStream, FrameCodec>
//! │ Connection │ ──────────► │ actor │ ◄──────────────────────────────► server
//! │ Transaction│ ◄────────── └───────┘
//! └────────────┘  routed replies
//! ```

mod config;
mod connection;
mod error;
mod frame;
mod pool;
mod retry;

pub use config::{
    TransportConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONNECT_ATTEMPTS,
    DEFAULT_REQUEST_TIMEOUT_SECS, PROTOCOL_VERSION,
};
pub use connection::{dial, Connection, ConnectionState, Transaction};
pub use error::{TransportError, TransportResult};
pub use frame::{Frame, FrameCodec, HEADER_LEN, MAX_FRAME_LEN};
pub use pool::{Endpoint, Transport};
pub use retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
};
