//! Error types for the Cthun client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cthun_client::{ConnectionManager, Result};
//!
//! fn example(manager: &ConnectionManager) -> Result<()> {
//!     let connection = manager.create_connection("wss://localhost:8090/cthun/")?;
//!     manager.open(&connection)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | API misuse | [`Error::ConnectionNotFound`], [`Error::AlreadyOpen`], [`Error::NotOpen`], [`Error::PreconditionViolated`] |
//! | Transport | [`Error::Transport`] |
//! | External | [`Error::Io`], [`Error::WebSocket`] |
//!
//! Handshake and close failures are never returned from `open` or
//! `close_all_connections`; they are recorded on the connection and
//! delivered through its callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::connection::ConnectionState;
use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid or missing TLS material.
    ///
    /// Returned by `configure_secure_endpoint` before any connection is
    /// attempted.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Target URL could not be used for a secure WebSocket connection.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection is not (or no longer) held by the manager.
    #[error("Connection not found: {id}")]
    ConnectionNotFound {
        /// The unknown connection ID.
        id: ConnectionId,
    },

    /// `open` was called on a connection that was already opened.
    #[error("Connection {id} is already open")]
    AlreadyOpen {
        /// The connection ID.
        id: ConnectionId,
    },

    /// Send attempted on a connection that is not open.
    #[error("Connection {id} is not open (state: {state})")]
    NotOpen {
        /// The connection ID.
        id: ConnectionId,
        /// State observed when the send was rejected.
        state: ConnectionState,
    },

    /// Operation called in a state where it is not allowed.
    #[error("Precondition violated: {message}")]
    PreconditionViolated {
        /// Description of the violated precondition.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport engine failure.
    ///
    /// Returned by engine implementations; surfaced to callers only through
    /// the failure reason of a connection.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error, e.g. a rejected upgrade.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a connection not found error.
    #[inline]
    pub fn connection_not_found(id: ConnectionId) -> Self {
        Self::ConnectionNotFound { id }
    }

    /// Creates an already open error.
    #[inline]
    pub fn already_open(id: ConnectionId) -> Self {
        Self::AlreadyOpen { id }
    }

    /// Creates a not open error.
    #[inline]
    pub fn not_open(id: ConnectionId, state: ConnectionState) -> Self {
        Self::NotOpen { id, state }
    }

    /// Creates a precondition violated error.
    #[inline]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolated {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidUrl { .. })
    }

    /// Returns `true` if this is a synchronous API misuse error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotFound { .. }
                | Self::AlreadyOpen { .. }
                | Self::NotOpen { .. }
                | Self::PreconditionViolated { .. }
        )
    }

    /// Returns `true` if this error came from the transport layer.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_) | Self::WebSocket(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
