//! Transport layer.
//!
//! The connection manager consumes TLS + WebSocket I/O through the
//! [`TransportEngine`] trait; [`WebSocketEngine`] is the default
//! implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌─────────────────┐
//! │ ConnectionManager    │                          │  Cthun server   │
//! │                      │   WebSocket over mTLS    │                 │
//! │  TransportHandle ────┼─────────────────────────►│                 │
//! │  InboundSink ◄───────┼──────────────────────────│                 │
//! └──────────────────────┘      wss://host:port     └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | Engine/handle traits and the inbound event sink |
//! | `websocket` | tokio-rustls + tokio-tungstenite engine |

// ============================================================================
// Submodules
// ============================================================================

/// Engine and handle traits.
pub mod engine;

/// WebSocket engine and per-connection event loop.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{HandshakeRequest, InboundSink, TransportEngine, TransportHandle};
pub use websocket::{DEFAULT_OUTBOUND_CAPACITY, WebSocketEngine};
