//! Cthun client - secure WebSocket connection manager.
//!
//! This library opens and tracks many independent connections to Cthun
//! servers over WebSocket with mandatory mutual TLS, sends text payloads on
//! specific connections, reports lifecycle transitions through callbacks or
//! awaitable completion, and tears everything down deterministically.
//!
//! # Architecture
//!
//! - **[`ConnectionManager`]**: registry of connections, shared TLS context,
//!   handshake scheduling and teardown
//! - **[`Connection`]**: one logical link with its own state machine
//!   (`Connecting → Open | Failed`, `Open → Closed`)
//! - **[`TransportEngine`]**: the TLS + WebSocket I/O seam;
//!   [`WebSocketEngine`] is the default
//!
//! Every engine event passes through one dispatcher task per manager, so
//! callbacks for a connection always arrive as `open | fail`, then any
//! number of `message`, then `close`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cthun_client::{ConnectionManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::new()?;
//!     manager.configure_secure_endpoint(
//!         "ssl/ca_crt.pem",
//!         "ssl/client_crt.pem",
//!         "ssl/client_key.pem",
//!     )?;
//!
//!     let connection = manager.create_connection("wss://localhost:8090/cthun/")?;
//!     connection.set_on_message_callback(|_, connection, text| {
//!         println!("{}: {text}", connection.id());
//!     })?;
//!     manager.open(&connection)?;
//!
//!     let report = manager
//!         .wait_settled(&[connection.clone()], Duration::from_secs(10))
//!         .await;
//!     if report.all_open() {
//!         manager.send(&connection, "hello")?;
//!     }
//!
//!     manager.close_all_connections().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`], its state machine and callbacks |
//! | [`endpoint`] | [`EndpointConfig`] and [`TlsContext`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ConnectionId`] |
//! | [`manager`] | [`ConnectionManager`], builder, [`Messenger`] |
//! | [`transport`] | Engine traits and the WebSocket engine |

// ============================================================================
// Modules
// ============================================================================

/// Connection state, callbacks and completion.
pub mod connection;

/// Mutual TLS material.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Connection manager and event dispatch.
pub mod manager;

/// Transport engine seam and the default WebSocket engine.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    CloseCallback, CloseEvent, CloseInitiator, Connection, ConnectionRef, ConnectionState,
    EventCallback, MessageCallback,
};

// Endpoint types
pub use endpoint::{EndpointConfig, TlsContext};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Manager types
pub use manager::{
    ConnectionManager, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, ManagerBuilder,
    Messenger, SettleReport,
};

// Transport types
pub use transport::{
    DEFAULT_OUTBOUND_CAPACITY, HandshakeRequest, InboundSink, TransportEngine, TransportHandle,
    WebSocketEngine,
};
