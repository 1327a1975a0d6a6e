//! Mutual TLS context shared by all connections.
//!
//! Parses the CA bundle, client certificate chain and client private key,
//! and compiles them into one rustls [`ClientConfig`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

use crate::error::{Error, Result};

use super::config::EndpointConfig;

// ============================================================================
// TlsContext
// ============================================================================

/// Reusable client TLS configuration with client authentication.
///
/// Cheap to clone; every clone shares the same compiled [`ClientConfig`].
#[derive(Clone)]
pub struct TlsContext {
    /// Compiled rustls client configuration.
    client_config: Arc<ClientConfig>,
    /// Files this context was loaded from, if any.
    endpoint: Option<EndpointConfig>,
}

impl TlsContext {
    /// Loads the PEM files named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a file cannot be read or parsed, or
    /// if rustls rejects the certificate/key pair.
    pub fn from_endpoint(config: &EndpointConfig) -> Result<Self> {
        let ca_pem = read_pem("CA certificate", config.ca_cert_path())?;
        let cert_pem = read_pem("client certificate", config.client_cert_path())?;
        let key_pem = read_pem("client private key", config.client_key_path())?;

        let mut context = Self::from_pem(&ca_pem, &cert_pem, &key_pem)?;
        context.endpoint = Some(config.clone());

        debug!(
            ca = %config.ca_cert_path().display(),
            cert = %config.client_cert_path().display(),
            "Secure endpoint context loaded"
        );

        Ok(context)
    }

    /// Builds a context from in-memory PEM data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any input holds no usable PEM item or
    /// the certificate/key pair is rejected.
    pub fn from_pem(ca_pem: &[u8], cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let roots = load_root_store(ca_pem)?;
        let cert_chain = load_cert_chain(cert_pem)?;
        let key = load_private_key(key_pem)?;

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(cert_chain, key)
            .map_err(|e| Error::config(format!("Client certificate/key rejected: {e}")))?;

        Ok(Self {
            client_config: Arc::new(client_config),
            endpoint: None,
        })
    }

    /// Returns the compiled rustls configuration.
    #[inline]
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Returns the files this context was loaded from.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        self.endpoint.as_ref()
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("endpoint", &self.endpoint)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

// ============================================================================
// PEM Loading
// ============================================================================

fn read_pem(label: &str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::config(format!(
            "Failed to read {label} file '{}': {e}",
            path.display()
        ))
    })
}

/// Parses every certificate in `pem` into a trust store.
fn load_root_store(pem: &[u8]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    for cert in parse_certificates(pem, "CA certificate")? {
        store
            .add(cert)
            .map_err(|e| Error::config(format!("Invalid CA certificate: {e}")))?;
    }

    if store.is_empty() {
        return Err(Error::config("No valid certificates found in CA file"));
    }

    Ok(store)
}

fn load_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let chain = parse_certificates(pem, "client certificate")?;

    if chain.is_empty() {
        return Err(Error::config(
            "No valid certificates found in client certificate file",
        ));
    }

    Ok(chain)
}

fn parse_certificates(pem: &[u8], label: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = Cursor::new(pem);

    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("Failed to parse {label}: {e}")))
}

/// Accepts PKCS#1, PKCS#8 and SEC1 keys; the first key in the file wins.
fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = Cursor::new(pem);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("Failed to parse client private key: {e}")))?
        .ok_or_else(|| Error::config("No private key found in client private key file"))
}

// ============================================================================
// Tests
// ============================================================================
