//! One live session per logical server endpoint.
//!
//! Sessions are opened lazily on first use and shared by every caller until
//! they fail. A caller that sees its session die calls
//! [`Transport::invalidate`]; the next [`Transport::session`] call
//! re-dials and re-negotiates.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::config::TransportConfig;
use super::error::TransportError;
use crate::session::{AuthError, AuthResult, Session, SessionNegotiator};

/// Logical server a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Authentication server; also serves manifests.
    Auth,
    /// Patch-content server.
    Content,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Auth => "auth",
            Endpoint::Content => "content",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session pool keyed by [`Endpoint`].
pub struct Transport {
    negotiator: SessionNegotiator,
    addresses: HashMap<Endpoint, String>,
    sessions: Mutex<HashMap<Endpoint, Session>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_negotiator(SessionNegotiator::new(config))
    }

    pub fn with_negotiator(negotiator: SessionNegotiator) -> Self {
        Self {
            negotiator,
            addresses: HashMap::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the `host:port` an endpoint dials.
    pub fn with_endpoint(mut self, endpoint: Endpoint, addr: impl Into<String>) -> Self {
        self.addresses.insert(endpoint, addr.into());
        self
    }

    pub fn address(&self, endpoint: Endpoint) -> Option<&str> {
        self.addresses.get(&endpoint).map(String::as_str)
    }

    /// Returns the live session for `endpoint`, opening one if needed.
    ///
    /// Concurrent callers share a single negotiation.
    pub async fn session(&self, endpoint: Endpoint) -> AuthResult<Session> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(&endpoint) {
            if session.is_open() {
                return Ok(session.clone());
            }
            debug!(%endpoint, "Discarding closed session");
            sessions.remove(&endpoint);
        }

        let addr = self.address(endpoint).ok_or_else(|| {
            AuthError::Unreachable(TransportError::Unreachable {
                addr: endpoint.to_string(),
                attempts: 0,
                reason: "no address configured".to_string(),
            })
        })?;

        let session = self.negotiator.connect(addr).await?;
        info!(%endpoint, peer = %session.peer(), "Endpoint connected");
        sessions.insert(endpoint, session.clone());
        Ok(session)
    }

    /// Drops `failed` from the pool if it is still the current session.
    ///
    /// A sibling may already have replaced it; that replacement is kept.
    pub async fn invalidate(&self, endpoint: Endpoint, failed: &Session) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&endpoint).is_some_and(|s| s.same_as(failed)) {
            debug!(%endpoint, "Invalidating session");
            sessions.remove(&endpoint);
        }
        failed.close();
    }

    /// Closes every pooled session.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (endpoint, session) in sessions.drain() {
            debug!(%endpoint, "Closing session");
            session.close();
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}
