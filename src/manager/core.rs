//! Connection manager.
//!
//! Owns the TLS context, the registry of connections and the dispatcher
//! task that turns engine events into state transitions and callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::{CloseEvent, Connection, ConnectionRef, ConnectionState};
use crate::endpoint::{EndpointConfig, TlsContext};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::transport::{HandshakeRequest, InboundSink, TransportEngine, TransportHandle};

use super::builder::{ManagerBuilder, ManagerSettings};
use super::dispatch::{DispatchEvent, Dispatcher};
use super::messenger::Messenger;
use super::settle::SettleReport;

// ============================================================================
// Constants
// ============================================================================

/// Only scheme accepted by `create_connection`.
const SECURE_SCHEME: &str = "wss";

/// Failure reason recorded when the handshake timeout expires.
const TIMEOUT_REASON: &str = "timeout";

// ============================================================================
// Types
// ============================================================================

/// TLS context plus the reconfiguration guard.
#[derive(Default)]
struct EndpointSlot {
    context: Option<TlsContext>,
    /// Set once the first connection is created with `context`.
    sealed: bool,
}

/// Shared manager state.
pub(crate) struct ManagerInner {
    settings: ManagerSettings,
    engine: Arc<dyn TransportEngine>,
    runtime: Handle,
    endpoint: Mutex<EndpointSlot>,
    registry: Mutex<FxHashMap<ConnectionId, ConnectionRef>>,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Registry and orchestration point for secure WebSocket connections.
///
/// Cheap to clone; clones share the same registry and TLS context. When
/// the last clone is dropped every remaining connection is closed without
/// callbacks.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use cthun_client::ConnectionManager;
///
/// # async fn example() -> cthun_client::Result<()> {
/// let manager = ConnectionManager::new()?;
/// manager.configure_secure_endpoint("ca.pem", "client.pem", "client_key.pem")?;
///
/// let connection = manager.create_connection("wss://localhost:8090/cthun/")?;
/// connection.set_on_open_callback(|messenger, connection| {
///     let _ = messenger.send(connection, "hello");
/// })?;
/// manager.open(&connection)?;
///
/// manager.wait_settled(&[connection], Duration::from_secs(10)).await;
/// manager.close_all_connections().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.inner.settings)
            .field("configured", &self.is_configured())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Construction
// ============================================================================

impl ConnectionManager {
    /// Creates a builder for a manager.
    #[inline]
    #[must_use]
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Creates a manager with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] outside a tokio runtime.
    pub fn new() -> Result<Self> {
        ManagerBuilder::new().build()
    }

    pub(crate) fn start(
        settings: ManagerSettings,
        engine: Arc<dyn TransportEngine>,
        runtime: Handle,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ManagerInner {
            settings,
            engine,
            runtime: runtime.clone(),
            endpoint: Mutex::new(EndpointSlot::default()),
            registry: Mutex::new(FxHashMap::default()),
            events_tx,
        });

        let dispatcher = Dispatcher::new(Arc::downgrade(&inner), events_rx);
        runtime.spawn(dispatcher.run());

        debug!(
            handshake_timeout_ms = settings.handshake_timeout.as_millis() as u64,
            shutdown_timeout_ms = settings.shutdown_timeout.as_millis() as u64,
            "ConnectionManager started"
        );

        Self { inner }
    }
}

// ============================================================================
// ConnectionManager - Endpoint
// ============================================================================

impl ConnectionManager {
    /// Loads the CA bundle, client certificate and client key used for
    /// every connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a file is missing or holds no usable PEM data;
    ///   the manager is left unconfigured
    /// - [`Error::PreconditionViolated`] once a connection has been created
    pub fn configure_secure_endpoint(
        &self,
        ca_cert_path: impl AsRef<Path>,
        client_cert_path: impl AsRef<Path>,
        client_key_path: impl AsRef<Path>,
    ) -> Result<()> {
        self.configure(EndpointConfig::new(
            ca_cert_path.as_ref(),
            client_cert_path.as_ref(),
            client_key_path.as_ref(),
        ))
    }

    /// Same as [`configure_secure_endpoint`](Self::configure_secure_endpoint)
    /// with the paths bundled.
    ///
    /// # Errors
    ///
    /// See [`configure_secure_endpoint`](Self::configure_secure_endpoint).
    pub fn configure(&self, config: EndpointConfig) -> Result<()> {
        let mut slot = self.inner.endpoint.lock();
        ensure_unsealed(&slot)?;

        match config.load() {
            Ok(context) => {
                info!(ca = %config.ca_cert_path().display(), "Secure endpoint configured");
                slot.context = Some(context);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Secure endpoint configuration failed");
                slot.context = None;
                Err(e)
            }
        }
    }

    /// Installs a prebuilt TLS context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionViolated`] once a connection has been
    /// created.
    pub fn set_tls_context(&self, context: TlsContext) -> Result<()> {
        let mut slot = self.inner.endpoint.lock();
        ensure_unsealed(&slot)?;

        slot.context = Some(context);
        debug!("TLS context installed");
        Ok(())
    }

    /// Returns `true` if a TLS context is installed.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.inner.endpoint.lock().context.is_some()
    }
}

fn ensure_unsealed(slot: &EndpointSlot) -> Result<()> {
    if slot.sealed {
        return Err(Error::precondition(
            "secure endpoint cannot be reconfigured after connections were created",
        ));
    }
    Ok(())
}

fn not_configured() -> Error {
    Error::precondition("secure endpoint not configured")
}

// ============================================================================
// ConnectionManager - Connections
// ============================================================================

impl ConnectionManager {
    /// Registers a new connection to `url` in state `Connecting`.
    ///
    /// No I/O happens until [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// - [`Error::PreconditionViolated`] if the endpoint is not configured
    /// - [`Error::InvalidUrl`] unless `url` is a `wss://` URL with a host
    pub fn create_connection(&self, url: &str) -> Result<ConnectionRef> {
        if !self.is_configured() {
            return Err(not_configured());
        }

        let target_url = parse_target(url)?;

        let mut slot = self.inner.endpoint.lock();
        if slot.context.is_none() {
            return Err(not_configured());
        }
        slot.sealed = true;

        let mut registry = self.inner.registry.lock();
        let id = loop {
            let id = ConnectionId::new();
            if !registry.contains_key(&id) {
                break id;
            }
        };

        let connection = Arc::new(Connection::new(id, target_url));
        registry.insert(id, Arc::clone(&connection));

        debug!(%id, server = %connection.remote_server(), "Connection created");
        Ok(connection)
    }

    /// Starts the handshake for `connection` on a background task.
    ///
    /// Returns immediately. The outcome is reported through the open or
    /// fail callback and [`Connection::settled`]. A handshake that exceeds
    /// the handshake timeout fails with reason `"timeout"`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if the manager no longer holds it
    /// - [`Error::AlreadyOpen`] if it is open or its handshake is running
    /// - [`Error::PreconditionViolated`] if the endpoint is not configured
    ///   or the connection already failed or closed
    pub fn open(&self, connection: &Connection) -> Result<()> {
        let tls = self
            .inner
            .endpoint
            .lock()
            .context
            .clone()
            .ok_or_else(not_configured)?;

        // Held until the abort handle is stored so teardown sees it.
        let registry = self.inner.registry.lock();

        let id = connection.id();
        let entry = registry
            .get(&id)
            .ok_or_else(|| Error::connection_not_found(id))?;

        entry.begin_open()?;

        let request = HandshakeRequest {
            id,
            url: entry.target_url().clone(),
            tls,
            inbound: InboundSink::new(id, self.inner.events_tx.clone()),
        };

        let task = self.inner.runtime.spawn(run_handshake(
            Arc::clone(&self.inner.engine),
            request,
            self.inner.settings.handshake_timeout,
            self.inner.events_tx.clone(),
        ));
        entry.set_pending(task.abort_handle());

        debug!(%id, server = %entry.remote_server(), "Handshake started");
        Ok(())
    }

    /// Sends `payload` as a text frame on `connection`.
    ///
    /// Only enqueues; never waits for the network.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] unless the connection is open
    /// - [`Error::ConnectionNotFound`] if the manager no longer holds it
    /// - [`Error::Transport`] if the outbound queue is full or the
    ///   transport is gone
    pub fn send(&self, connection: &Connection, payload: impl Into<String>) -> Result<()> {
        self.inner.send(connection, payload.into())
    }

    /// Closes one connection and removes it from the manager.
    ///
    /// Fires the close callback if the connection was open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if the manager no longer holds it.
    pub async fn close(&self, connection: &Connection) -> Result<()> {
        let id = connection.id();
        let entry = self
            .inner
            .registry
            .lock()
            .remove(&id)
            .ok_or_else(|| Error::connection_not_found(id))?;

        self.inner.shutdown(vec![entry]).await;
        Ok(())
    }

    /// Closes every connection and empties the registry.
    ///
    /// Pending handshakes are cancelled. Close handshakes run concurrently
    /// and are bounded by the shutdown timeout; connections that miss it
    /// are released anyway and reported with `clean == false`. Open
    /// connections end `Closed`, failed ones stay `Failed`.
    ///
    /// Calling it again, or on an empty manager, does nothing.
    pub async fn close_all_connections(&self) {
        let drained: Vec<ConnectionRef> = self
            .inner
            .registry
            .lock()
            .drain()
            .map(|(_, connection)| connection)
            .collect();

        if drained.is_empty() {
            debug!("close_all_connections: no connections");
            return;
        }

        info!(count = drained.len(), "Closing all connections");
        self.inner.shutdown(drained).await;
        info!("All connections closed");
    }
}

// ============================================================================
// ConnectionManager - Lookup
// ============================================================================

impl ConnectionManager {
    /// Returns the connection with `id` if the manager still holds it.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionRef> {
        self.inner.lookup(id)
    }

    /// Returns every connection held by the manager.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionRef> {
        self.inner.registry.lock().values().cloned().collect()
    }

    /// Returns the number of connections held by the manager.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Returns a send handle bound to this manager.
    #[must_use]
    pub fn messenger(&self) -> Messenger {
        Messenger::new(Arc::downgrade(&self.inner))
    }

    /// Waits until none of `connections` is still connecting, or until
    /// `limit` elapses, and reports where each one ended up.
    pub async fn wait_settled(&self, connections: &[ConnectionRef], limit: Duration) -> SettleReport {
        let waits = join_all(connections.iter().map(|connection| connection.settled()));

        if timeout(limit, waits).await.is_err() {
            debug!(
                timeout_ms = limit.as_millis() as u64,
                "wait_settled timed out"
            );
        }

        SettleReport::collect(connections)
    }
}

// ============================================================================
// ManagerInner
// ============================================================================

impl ManagerInner {
    pub(crate) fn lookup(&self, id: ConnectionId) -> Option<ConnectionRef> {
        self.registry.lock().get(&id).cloned()
    }

    /// Installs a finished handshake's transport on `id`.
    ///
    /// Runs under the registry lock, so a connection drained by teardown
    /// can never turn `Open`; the handle is returned to be closed instead.
    pub(crate) fn attach(
        &self,
        id: ConnectionId,
        handle: Box<dyn TransportHandle>,
    ) -> std::result::Result<ConnectionRef, Box<dyn TransportHandle>> {
        let registry = self.registry.lock();

        let Some(connection) = registry.get(&id) else {
            return Err(handle);
        };

        connection.clear_pending();
        connection.mark_open(handle)?;
        Ok(Arc::clone(connection))
    }

    pub(crate) fn send(&self, connection: &Connection, payload: String) -> Result<()> {
        let id = connection.id();

        let state = connection.state();
        if state != ConnectionState::Open {
            return Err(Error::not_open(id, state));
        }

        let entry = self
            .lookup(id)
            .ok_or_else(|| Error::connection_not_found(id))?;

        entry.send_text(payload)
    }

    /// Closes a transport nobody owns any more, in the background.
    pub(crate) fn close_detached(&self, handle: Box<dyn TransportHandle>) {
        let limit = self.settings.shutdown_timeout;

        self.runtime.spawn(async move {
            if timeout(limit, handle.close()).await.is_err() {
                debug!("Detached transport close timed out");
            }
        });
    }

    /// Tears down connections already removed from the registry.
    async fn shutdown(&self, connections: Vec<ConnectionRef>) {
        for connection in &connections {
            connection.abort_pending();
        }

        let limit = self.settings.shutdown_timeout;

        let closes = connections.into_iter().map(|connection| async move {
            let clean = match connection.take_transport() {
                Some(handle) => match timeout(limit, handle.close()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(id = %connection.id(), error = %e, "Close handshake failed");
                        false
                    }
                    Err(_) => {
                        warn!(
                            id = %connection.id(),
                            timeout_ms = limit.as_millis() as u64,
                            "Close handshake timed out"
                        );
                        false
                    }
                },
                None => true,
            };
            (connection, clean)
        });

        let closed = join_all(closes).await;

        // Transitions and close callbacks go through the dispatcher so they
        // stay ordered after any message already queued for the connection.
        let mut acks = Vec::with_capacity(closed.len());
        for (connection, clean) in closed {
            let (ack, ack_rx) = oneshot::channel();
            let event = DispatchEvent::Teardown {
                connection: Arc::clone(&connection),
                event: CloseEvent::local(clean),
                ack,
            };

            if self.events_tx.send(event).is_err() {
                connection.mark_closed();
                continue;
            }
            acks.push(ack_rx);
        }

        join_all(acks).await;
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let remaining: Vec<ConnectionRef> = self
            .registry
            .get_mut()
            .drain()
            .map(|(_, connection)| connection)
            .collect();

        if !remaining.is_empty() {
            debug!(count = remaining.len(), "Manager dropped with live connections");
        }

        for connection in remaining {
            connection.abort_pending();
            connection.mark_closed();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses `url` and checks it names a secure WebSocket endpoint.
fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;

    if parsed.scheme() != SECURE_SCHEME {
        return Err(Error::invalid_url(
            url,
            format!("scheme must be '{SECURE_SCHEME}', got '{}'", parsed.scheme()),
        ));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_url(url, "missing host"));
    }

    Ok(parsed)
}

/// Runs one handshake and reports the outcome to the dispatcher.
async fn run_handshake(
    engine: Arc<dyn TransportEngine>,
    request: HandshakeRequest,
    limit: Duration,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
) {
    let id = request.id;

    let event = match timeout(limit, engine.connect(request)).await {
        Ok(Ok(handle)) => DispatchEvent::HandshakeSucceeded { id, handle },
        Ok(Err(e)) => {
            debug!(%id, error = %e, "Handshake failed");
            DispatchEvent::HandshakeFailed {
                id,
                reason: e.to_string(),
            }
        }
        Err(_) => {
            debug!(%id, timeout_ms = limit.as_millis() as u64, "Handshake timed out");
            DispatchEvent::HandshakeFailed {
                id,
                reason: TIMEOUT_REASON.to_string(),
            }
        }
    };

    // Manager gone: the handle, if any, is dropped and its loop exits.
    let _ = events_tx.send(event);
}

// ============================================================================
// Tests
// ============================================================================
