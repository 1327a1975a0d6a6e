//! Secure endpoint configuration.
//!
//! Holds the paths of the TLS material applied to every outgoing connection
//! and validates them before anything is parsed.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::tls::TlsContext;

// ============================================================================
// EndpointConfig
// ============================================================================

/// CA certificate, client certificate and client private key locations.
///
/// # Example
///
/// ```no_run
/// use cthun_client::EndpointConfig;
///
/// # fn example() -> cthun_client::Result<()> {
/// let config = EndpointConfig::new(
///     "./test-resources/ssl/ca/ca_crt.pem",
///     "./test-resources/ssl/certs/cthun-client.pem",
///     "./test-resources/ssl/private_keys/cthun-client.pem",
/// );
/// let tls = config.load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// PEM file with one or more trusted CA certificates.
    ca_cert_path: PathBuf,
    /// PEM file with the client certificate chain.
    client_cert_path: PathBuf,
    /// PEM file with the client private key.
    client_key_path: PathBuf,
}

impl EndpointConfig {
    /// Creates a configuration from the three PEM paths.
    #[must_use]
    pub fn new(
        ca_cert_path: impl Into<PathBuf>,
        client_cert_path: impl Into<PathBuf>,
        client_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca_cert_path: ca_cert_path.into(),
            client_cert_path: client_cert_path.into(),
            client_key_path: client_key_path.into(),
        }
    }

    /// Path of the CA certificate file.
    #[inline]
    #[must_use]
    pub fn ca_cert_path(&self) -> &Path {
        &self.ca_cert_path
    }

    /// Path of the client certificate file.
    #[inline]
    #[must_use]
    pub fn client_cert_path(&self) -> &Path {
        &self.client_cert_path
    }

    /// Path of the client private key file.
    #[inline]
    #[must_use]
    pub fn client_key_path(&self) -> &Path {
        &self.client_key_path
    }

    /// Checks that every path is non-empty and names an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending path.
    pub fn validate(&self) -> Result<()> {
        validate_file("CA certificate", &self.ca_cert_path)?;
        validate_file("client certificate", &self.client_cert_path)?;
        validate_file("client private key", &self.client_key_path)?;
        Ok(())
    }

    /// Validates the paths and builds the TLS context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a file is missing or unreadable, holds
    /// no usable PEM item, or the certificate and key are rejected.
    pub fn load(&self) -> Result<TlsContext> {
        self.validate()?;
        TlsContext::from_endpoint(self)
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_file(label: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::config(format!("{label} path is empty")));
    }

    if !path.is_file() {
        return Err(Error::config(format!(
            "{label} not found at: {}",
            path.display()
        )));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
