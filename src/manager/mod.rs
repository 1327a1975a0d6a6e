//! Connection manager.
//!
//! This module handles:
//! * Endpoint configuration and the connection registry
//! * Handshake scheduling with timeouts
//! * Event dispatch and callback ordering
//! * Teardown of every connection with a shutdown deadline

// ============================================================================
// Submodules
// ============================================================================

/// Builder and default timeouts.
pub mod builder;

/// `ConnectionManager` and its operations.
pub mod core;

/// Dispatcher task.
pub(crate) mod dispatch;

/// Reply handle for callbacks.
pub mod messenger;

/// Handshake outcome summary.
pub mod settle;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, ManagerBuilder};
pub use core::ConnectionManager;
pub use messenger::Messenger;
pub use settle::SettleReport;
