#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cthun_client::{
    ConnectionId, ConnectionManager, Error, HandshakeRequest, InboundSink, Result,
    TransportEngine, TransportHandle,
};
use futures_util::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// ============================================================================
// Fixtures
// ============================================================================

pub const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ssl");

pub fn fixture(name: &str) -> String {
    format!("{FIXTURES}/{name}")
}

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configures `manager` with the fixture CA and client identity.
pub fn configure(manager: &ConnectionManager) {
    manager
        .configure_secure_endpoint(
            fixture("ca_crt.pem"),
            fixture("client_crt.pem"),
            fixture("client_key.pem"),
        )
        .unwrap();
}

// ============================================================================
// MockEngine
// ============================================================================

/// Scripted handshake result, chosen by the URL host.
///
/// Hosts starting with `fail` fail, hosts starting with `hang` never
/// finish, everything else opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Open,
    Fail,
    Hang,
}

impl Outcome {
    fn for_host(host: &str) -> Self {
        if host.starts_with("fail") {
            Self::Fail
        } else if host.starts_with("hang") {
            Self::Hang
        } else {
            Self::Open
        }
    }
}

#[derive(Default)]
struct MockState {
    sinks: Mutex<FxHashMap<ConnectionId, InboundSink>>,
    sent: Mutex<Vec<(ConnectionId, String)>>,
    connects: AtomicUsize,
    opened: AtomicUsize,
    closes: AtomicUsize,
}

/// Engine that never touches the network.
///
/// Opened connections echo every payload back as an inbound message and
/// record it in [`MockEngine::sent`].
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads that reached a transport, in order.
    pub fn sent(&self) -> Vec<(ConnectionId, String)> {
        self.state.sent.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Handles handed out by successful handshakes.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Injects an inbound frame as if the server had sent it.
    pub fn push(&self, id: ConnectionId, text: &str) {
        if let Some(sink) = self.state.sinks.lock().get(&id) {
            sink.message(text);
        }
    }

    /// Simulates the server dropping the connection.
    pub fn drop_remote(&self, id: ConnectionId, reason: &str) {
        if let Some(sink) = self.state.sinks.lock().remove(&id) {
            sink.closed(Some(reason.to_string()));
        }
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn connect(&self, request: HandshakeRequest) -> Result<Box<dyn TransportHandle>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let host = request.url.host_str().unwrap_or_default().to_string();
        match Outcome::for_host(&host) {
            Outcome::Fail => Err(Error::transport(format!("connection refused by {host}"))),
            Outcome::Hang => std::future::pending().await,
            Outcome::Open => {
                self.state.opened.fetch_add(1, Ordering::SeqCst);
                self.state
                    .sinks
                    .lock()
                    .insert(request.id, request.inbound.clone());

                Ok(Box::new(MockHandle {
                    id: request.id,
                    inbound: request.inbound,
                    state: Arc::clone(&self.state),
                }))
            }
        }
    }
}

struct MockHandle {
    id: ConnectionId,
    inbound: InboundSink,
    state: Arc<MockState>,
}

#[async_trait]
impl TransportHandle for MockHandle {
    fn send_text(&self, payload: String) -> Result<()> {
        self.state.sent.lock().push((self.id, payload.clone()));
        self.inbound.message(payload);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.sinks.lock().remove(&self.id);
        Ok(())
    }
}

/// Manager wired to `engine` with short timeouts.
pub fn mock_manager(engine: &MockEngine) -> ConnectionManager {
    let manager = ConnectionManager::builder()
        .handshake_timeout(Duration::from_millis(200))
        .shutdown_timeout(Duration::from_millis(500))
        .engine(engine.clone())
        .build()
        .unwrap();
    configure(&manager);
    manager
}

// ============================================================================
// EchoServer
// ============================================================================

/// In-process `wss://` server that requires a client certificate signed
/// by the fixture CA and echoes every text frame.
pub struct EchoServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    close_replies: Arc<AtomicUsize>,
    disconnect_tx: broadcast::Sender<String>,
}

impl EchoServer {
    /// Starts the server on a random localhost port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(server_config());

        let accepted = Arc::new(AtomicUsize::new(0));
        let close_replies = Arc::new(AtomicUsize::new(0));
        let (disconnect_tx, _) = broadcast::channel::<String>(16);

        let counter = Arc::clone(&accepted);
        let replies = Arc::clone(&close_replies);
        let disconnect = disconnect_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let acceptor = acceptor.clone();
                let counter = Arc::clone(&counter);
                let replies = Arc::clone(&replies);
                let mut disconnect_rx = disconnect.subscribe();

                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    let Ok(ws_stream) = tokio_tungstenite::accept_async(tls_stream).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);

                    let (mut write, mut read) = ws_stream.split();

                    loop {
                        tokio::select! {
                            message = read.next() => {
                                match message {
                                    Some(Ok(Message::Text(text))) => {
                                        if write.send(Message::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    // Keep reading so the close reply gets flushed
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            reason = disconnect_rx.recv() => {
                                let reason = reason.unwrap_or_default();
                                let frame = CloseFrame {
                                    code: CloseCode::Away,
                                    reason: reason.into(),
                                };
                                if write.send(Message::Close(Some(frame))).await.is_err() {
                                    break;
                                }

                                // Wait for the client to answer the close frame
                                let reply = tokio::time::timeout(Duration::from_secs(2), async {
                                    while let Some(Ok(message)) = read.next().await {
                                        if matches!(message, Message::Close(_)) {
                                            return true;
                                        }
                                    }
                                    false
                                })
                                .await;
                                if matches!(reply, Ok(true)) {
                                    replies.fetch_add(1, Ordering::SeqCst);
                                }
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            close_replies,
            disconnect_tx,
        }
    }

    /// `wss://localhost:<port>/cthun/`; the server certificate is issued
    /// for `localhost`.
    pub fn url(&self) -> String {
        format!("wss://localhost:{}/cthun/", self.addr.port())
    }

    /// Number of completed WebSocket upgrades.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Number of sessions whose client answered a server close frame.
    pub fn close_replies(&self) -> usize {
        self.close_replies.load(Ordering::SeqCst)
    }

    /// Sends a close frame with `reason` on every live session.
    pub fn disconnect_all(&self, reason: &str) {
        let _ = self.disconnect_tx.send(reason.to_string());
    }
}

// ============================================================================
// Rejecting Server
// ============================================================================

/// Starts a mutual-TLS server that answers every upgrade request with
/// `404 Not Found`; returns its `wss://` URL.
pub async fn start_rejecting_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(server_config());

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();

            tokio::spawn(async move {
                let Ok(mut tls_stream) = acceptor.accept(stream).await else {
                    return;
                };

                let mut request = [0_u8; 4096];
                if tls_stream.read(&mut request).await.is_err() {
                    return;
                }

                let _ = tls_stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                    .await;
                let _ = tls_stream.shutdown().await;
            });
        }
    });

    format!("wss://localhost:{port}/cthun/")
}

fn server_config() -> Arc<ServerConfig> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs("ca_crt.pem") {
        roots.add(cert).unwrap();
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .unwrap();

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs("server_crt.pem"), load_key("server_key.pem"))
        .unwrap();

    Arc::new(config)
}

fn load_certs(name: &str) -> Vec<CertificateDer<'static>> {
    let mut reader = BufReader::new(File::open(fixture(name)).unwrap());
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap()
}

fn load_key(name: &str) -> PrivateKeyDer<'static> {
    let mut reader = BufReader::new(File::open(fixture(name)).unwrap());
    rustls_pemfile::private_key(&mut reader).unwrap().unwrap()
}
