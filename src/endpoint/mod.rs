//! Secure endpoint configuration.
//!
//! Every connection created by a manager is authenticated with the same
//! CA bundle and client certificate/key pair.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | PEM file locations and validation |
//! | `tls` | Compiled rustls client context |

// ============================================================================
// Submodules
// ============================================================================

/// PEM file locations.
pub mod config;

/// rustls client context with client authentication.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::EndpointConfig;
pub use tls::TlsContext;
