//! Connection lifecycle.
//!
//! This module handles:
//! * The per-connection state machine
//! * Callback registration and the close event payload
//! * Awaitable completion (`settled`, `closed`)

// ============================================================================
// Submodules
// ============================================================================

/// Callback types and close details.
pub mod callback;

/// Connection type and transitions.
pub mod core;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use callback::{CloseCallback, CloseEvent, CloseInitiator, EventCallback, MessageCallback};
pub use core::{Connection, ConnectionRef};
pub use state::ConnectionState;
