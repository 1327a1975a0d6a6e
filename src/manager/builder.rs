//! Builder pattern for manager configuration.
//!
//! Provides a fluent API for configuring and creating
//! [`ConnectionManager`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use cthun_client::ConnectionManager;
//!
//! # async fn example() -> cthun_client::Result<()> {
//! let manager = ConnectionManager::builder()
//!     .handshake_timeout(Duration::from_secs(5))
//!     .shutdown_timeout(Duration::from_secs(2))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::transport::websocket::DEFAULT_OUTBOUND_CAPACITY;
use crate::transport::{TransportEngine, WebSocketEngine};

use super::core::ConnectionManager;

// ============================================================================
// Constants
// ============================================================================

/// Default limit for TLS handshake plus WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for closing all connections.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ManagerSettings
// ============================================================================

/// Timeouts applied by a built manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ManagerSettings {
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
}

// ============================================================================
// ManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`] instance.
///
/// Use [`ConnectionManager::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ManagerBuilder {
    /// Handshake timeout.
    handshake_timeout: Duration,
    /// Shutdown deadline for `close_all_connections`.
    shutdown_timeout: Duration,
    /// Outbound queue size for the default engine.
    outbound_capacity: usize,
    /// Transport engine; defaults to [`WebSocketEngine`].
    engine: Option<Arc<dyn TransportEngine>>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            engine: None,
        }
    }
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("custom_engine", &self.engine.is_some())
            .finish()
    }
}

// ============================================================================
// ManagerBuilder Implementation
// ============================================================================

impl ManagerBuilder {
    /// Creates a builder with default timeouts and the WebSocket engine.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a handshake may take before the connection fails
    /// with reason `"timeout"`.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets how long `close_all_connections` waits for close handshakes.
    #[inline]
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets how many outbound frames each connection may queue.
    ///
    /// Applies to the default engine only; a full queue makes `send` fail.
    #[inline]
    #[must_use]
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Replaces the transport engine.
    #[inline]
    #[must_use]
    pub fn engine(mut self, engine: impl TransportEngine) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Builds the manager and starts its dispatcher task.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timeout or the outbound capacity is zero
    /// - [`Error::PreconditionViolated`] if called outside a tokio runtime
    pub fn build(self) -> Result<ConnectionManager> {
        let settings = self.validate()?;

        let runtime = Handle::try_current().map_err(|_| {
            Error::precondition("ConnectionManager must be built inside a tokio runtime")
        })?;

        let outbound_capacity = self.outbound_capacity;
        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(WebSocketEngine::new().with_outbound_capacity(outbound_capacity))
        });

        Ok(ConnectionManager::start(settings, engine, runtime))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ManagerBuilder {
    fn validate(&self) -> Result<ManagerSettings> {
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake timeout must be greater than zero"));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(Error::config("shutdown timeout must be greater than zero"));
        }

        if self.outbound_capacity == 0 {
            return Err(Error::config("outbound capacity must be greater than zero"));
        }

        Ok(ManagerSettings {
            handshake_timeout: self.handshake_timeout,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
