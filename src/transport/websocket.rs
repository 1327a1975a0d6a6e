//! Default transport engine: WebSocket over mutually authenticated TLS.
//!
//! Each connection gets its own tokio task that owns the socket and
//! handles:
//!
//! - Incoming text frames (forwarded to the [`InboundSink`])
//! - Outgoing text frames queued by [`TransportHandle::send_text`]
//! - The close handshake requested by [`TransportHandle::close`]

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::{Host, Url};

use crate::error::{Error, Result};

use super::engine::{HandshakeRequest, InboundSink, TransportEngine, TransportHandle};

// ============================================================================
// Constants
// ============================================================================

/// Default number of outbound frames buffered per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How long to wait for the peer's close frame after sending ours.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Port used when a `wss://` URL does not name one.
const DEFAULT_WSS_PORT: u16 = 443;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<TlsStream<TcpStream>>;

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write a text frame.
    Send(String),
    /// Start the close handshake and report when the loop exits.
    Close { done: oneshot::Sender<()> },
}

// ============================================================================
// WebSocketEngine
// ============================================================================

/// Transport engine backed by tokio-rustls and tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketEngine {
    /// Bounded outbound queue size per connection.
    outbound_capacity: usize,
}

impl Default for WebSocketEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketEngine {
    /// Creates an engine with the default outbound queue size.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Sets how many outbound frames may be queued per connection.
    ///
    /// Values below 1 are raised to 1.
    #[inline]
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Returns the per-connection outbound queue size.
    #[inline]
    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }
}

#[async_trait]
impl TransportEngine for WebSocketEngine {
    async fn connect(&self, request: HandshakeRequest) -> Result<Box<dyn TransportHandle>> {
        let HandshakeRequest {
            id,
            url,
            tls,
            inbound,
        } = request;

        let (connect_host, server_name) = resolve_target(&url)?;
        let port = url.port_or_known_default().unwrap_or(DEFAULT_WSS_PORT);

        trace!(%id, host = %connect_host, port, "Opening TCP connection");
        let tcp_stream = TcpStream::connect((connect_host.as_str(), port)).await?;
        tcp_stream.set_nodelay(true)?;

        let connector = TlsConnector::from(tls.client_config());
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| Error::transport(format!("TLS handshake failed: {e}")))?;

        let (ws_stream, response) =
            tokio_tungstenite::client_async(url.as_str(), tls_stream).await?;

        debug!(%id, status = %response.status(), "WebSocket handshake completed");

        let (command_tx, command_rx) = mpsc::channel(self.outbound_capacity);
        tokio::spawn(run_event_loop(ws_stream, command_rx, inbound));

        Ok(Box::new(WebSocketHandle { command_tx }))
    }
}

/// Splits the URL host into a socket address host and a TLS server name.
fn resolve_target(url: &Url) -> Result<(String, ServerName<'static>)> {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let server_name = ServerName::try_from(domain.to_owned())
                .map_err(|_| Error::invalid_url(url.as_str(), "invalid hostname for TLS"))?;
            Ok((domain.to_owned(), server_name))
        }
        Some(Host::Ipv4(ip)) => Ok((
            ip.to_string(),
            ServerName::IpAddress(IpAddr::V4(ip).into()),
        )),
        Some(Host::Ipv6(ip)) => Ok((
            ip.to_string(),
            ServerName::IpAddress(IpAddr::V6(ip).into()),
        )),
        None => Err(Error::invalid_url(url.as_str(), "missing host")),
    }
}

// ============================================================================
// WebSocketHandle
// ============================================================================

/// Handle to one running event loop.
struct WebSocketHandle {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::Sender<TransportCommand>,
}

#[async_trait]
impl TransportHandle for WebSocketHandle {
    fn send_text(&self, payload: String) -> Result<()> {
        self.command_tx
            .try_send(TransportCommand::Send(payload))
            .map_err(|e| match e {
                TrySendError::Full(_) => Error::transport("outbound queue full"),
                TrySendError::Closed(_) => Error::transport("transport closed"),
            })
    }

    async fn close(&self) -> Result<()> {
        let (done, done_rx) = oneshot::channel();

        if self
            .command_tx
            .send(TransportCommand::Close { done })
            .await
            .is_err()
        {
            // Event loop already gone
            return Ok(());
        }

        // A dropped sender means the loop ended on its own, which is closed too.
        let _ = done_rx.await;
        Ok(())
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Event loop that handles WebSocket I/O for one connection.
async fn run_event_loop(
    ws_stream: WsStream,
    mut command_rx: mpsc::Receiver<TransportCommand>,
    inbound: InboundSink,
) {
    let id = inbound.id();
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let mut close_waiter: Option<oneshot::Sender<()>> = None;
    let mut remote_reason: Option<String> = None;

    let linger = sleep(CLOSE_LINGER);
    tokio::pin!(linger);

    loop {
        tokio::select! {
            // Incoming frames from the server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(%id, len = text.len(), "Text frame received");
                        inbound.message(text.as_str());
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!(%id, ?frame, "WebSocket closed by remote");
                        remote_reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());

                        // The close reply is queued by tungstenite; push it out
                        // before the socket is dropped.
                        if let Err(e) = ws_write.flush().await {
                            trace!(%id, error = %e, "Close reply not delivered");
                        }
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(%id, error = %e, "WebSocket error");
                        remote_reason = Some(e.to_string());
                        break;
                    }

                    None => {
                        debug!(%id, "WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Commands from the manager
            command = command_rx.recv(), if close_waiter.is_none() => {
                match command {
                    Some(TransportCommand::Send(text)) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(%id, error = %e, "Failed to send text frame");
                            remote_reason = Some(e.to_string());
                            break;
                        }
                    }

                    Some(TransportCommand::Close { done }) => {
                        debug!(%id, "Close requested");
                        let _ = ws_write.close().await;
                        linger.as_mut().reset(Instant::now() + CLOSE_LINGER);
                        close_waiter = Some(done);
                    }

                    None => {
                        debug!(%id, "Handle dropped, closing");
                        let _ = ws_write.close().await;
                        return;
                    }
                }
            }

            // Peer never answered our close frame
            () = &mut linger, if close_waiter.is_some() => {
                debug!(%id, "Close handshake not acknowledged");
                break;
            }
        }
    }

    match close_waiter {
        Some(done) => {
            let _ = done.send(());
        }
        None => inbound.closed(remote_reason),
    }

    debug!(%id, "Event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
