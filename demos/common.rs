//! Shared utilities for the demo driver.
//!
//! Provides:
//! - Command-line argument parsing
//! - Logging initialization
//! - Shell-style `~` expansion for certificate paths

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_SERVER: &str = "wss://localhost:8090/cthun/";
pub const DEFAULT_CA: &str = "./test-resources/ssl/ca/ca_crt.pem";
pub const DEFAULT_CERT: &str = "./test-resources/ssl/certs/cthun-client.pem";
pub const DEFAULT_KEY: &str = "./test-resources/ssl/private_keys/cthun-client.pem";

pub const USAGE: &str = "\
Allowed options:
  --help                   display help
  --server <url>           address of the cthun server (default: wss://localhost:8090/cthun/)
  --num-connections <n>    number of connections (default: 1)
  --ca <path>              CA certificate
  --cert <path>            client certificate
  --key <path>             client private key
  --debug                  verbose logging
  -M, --messages <text>    message sent on open; may repeat, also positional";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for the demo.
#[derive(Debug, Clone)]
pub struct Args {
    pub server: String,
    pub num_connections: usize,
    pub ca: String,
    pub cert: String,
    pub key: String,
    pub messages: Vec<String>,
    pub debug: bool,
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            num_connections: 1,
            ca: DEFAULT_CA.to_string(),
            cert: DEFAULT_CERT.to_string(),
            key: DEFAULT_KEY.to_string(),
            messages: Vec::new(),
            debug: false,
            help: false,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Result<Self, String> {
        Self::parse_from(std::env::args().skip(1))
    }

    /// Parse `args`, excluding the program name.
    pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| format!("missing value for {name}"))
            };

            match arg.as_str() {
                "--help" | "-h" => parsed.help = true,
                "--debug" => parsed.debug = true,
                "--server" => parsed.server = value("--server")?,
                "--ca" => parsed.ca = value("--ca")?,
                "--cert" => parsed.cert = value("--cert")?,
                "--key" => parsed.key = value("--key")?,
                "--messages" | "-M" => parsed.messages.push(value("--messages")?),
                "--num-connections" | "--num_connections" => {
                    let raw = value("--num-connections")?;
                    parsed.num_connections = raw
                        .parse()
                        .map_err(|_| format!("invalid number of connections: {raw}"))?;
                }
                flag if flag.starts_with("--") => return Err(format!("unknown option: {flag}")),
                _ => parsed.messages.push(arg),
            }
        }

        Ok(parsed)
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "cthun_client=debug,connect=debug"
    } else {
        "cthun_client=info,connect=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Expands a leading `~` the way a shell would.
pub fn expand_path(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

    if path == "~" {
        return home();
    }

    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}
