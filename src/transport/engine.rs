//! Transport engine interface.
//!
//! The manager never touches sockets directly. It asks a [`TransportEngine`]
//! to perform the TLS handshake and WebSocket upgrade, keeps the returned
//! [`TransportHandle`] on the connection, and receives inbound traffic
//! through an [`InboundSink`] keyed by connection ID.
//!
//! ```text
//! ConnectionManager ──connect()──► TransportEngine
//!        ▲                              │
//!        │                              ▼
//!   dispatcher ◄──InboundSink──── per-connection I/O task
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::endpoint::TlsContext;
use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::manager::dispatch::DispatchEvent;

// ============================================================================
// HandshakeRequest
// ============================================================================

/// Everything an engine needs to establish one connection.
#[derive(Debug)]
pub struct HandshakeRequest {
    /// Connection being established.
    pub id: ConnectionId,
    /// Target `wss://` URL.
    pub url: Url,
    /// Client TLS context shared by the manager.
    pub tls: TlsContext,
    /// Channel for inbound frames and remote close notifications.
    pub inbound: InboundSink,
}

// ============================================================================
// Traits
// ============================================================================

/// Performs TLS + WebSocket handshakes.
///
/// Implementations run their I/O on background tasks; `connect` is awaited
/// on a task spawned by the manager and bounded by its handshake timeout.
#[async_trait]
pub trait TransportEngine: Send + Sync + 'static {
    /// Establishes a connection and returns a live handle.
    ///
    /// # Errors
    ///
    /// Any error becomes the connection's failure reason.
    async fn connect(&self, request: HandshakeRequest) -> Result<Box<dyn TransportHandle>>;
}

/// Live transport owned by exactly one connection.
#[async_trait]
pub trait TransportHandle: Send + Sync + 'static {
    /// Enqueues `payload` as a text frame without waiting for the network.
    ///
    /// # Errors
    ///
    /// Fails if the transport is closed or its outbound queue is full.
    fn send_text(&self, payload: String) -> Result<()>;

    /// Performs the close handshake.
    ///
    /// Resolves once the transport has shut down. The manager bounds this
    /// with its shutdown deadline.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// InboundSink
// ============================================================================

/// Delivers inbound events for one connection to the manager.
///
/// Sends are fire-and-forget; events for a manager that no longer exists
/// are dropped.
#[derive(Debug, Clone)]
pub struct InboundSink {
    /// Connection the events belong to.
    id: ConnectionId,
    /// Dispatcher queue.
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl InboundSink {
    pub(crate) fn new(id: ConnectionId, events_tx: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        Self { id, events_tx }
    }

    /// Connection this sink reports for.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Reports an inbound text frame.
    pub fn message(&self, text: impl Into<String>) {
        let _ = self.events_tx.send(DispatchEvent::Message {
            id: self.id,
            text: text.into(),
        });
    }

    /// Reports that the peer closed the connection or the link dropped.
    pub fn closed(&self, reason: Option<String>) {
        let _ = self
            .events_tx
            .send(DispatchEvent::RemoteClosed { id: self.id, reason });
    }
}
