//! Test connection driver.
//!
//! Demonstrates:
//! - Configuring the secure endpoint from PEM files
//! - Creating N connections whose open callback sends the given messages
//! - Waiting for every handshake to settle instead of sleeping
//! - Sending one synchronous message per open connection
//! - Closing everything
//!
//! Usage:
//!   cargo run --example connect
//!   cargo run --example connect -- --num-connections 3 "hello" "world"
//!   cargo run --example connect -- --server wss://broker:8090/cthun/ --ca ~/ssl/ca.pem
//!   cargo run --example connect -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Args;
use cthun_client::{ConnectionManager, DEFAULT_HANDSHAKE_TIMEOUT, Result};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

// ============================================================================
// Constants
// ============================================================================

/// How long to wait for replies after the synchronous sends.
const REPLY_WINDOW: Duration = Duration::from_secs(4);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{}", common::USAGE);
            std::process::exit(1);
        }
    };

    if args.help {
        println!("{}", common::USAGE);
        return;
    }

    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let manager = ConnectionManager::new()?;

    manager.configure_secure_endpoint(
        common::expand_path(&args.ca),
        common::expand_path(&args.cert),
        common::expand_path(&args.key),
    )?;

    let received = Arc::new(AtomicUsize::new(0));
    let reply = Arc::new(Notify::new());
    let messages = Arc::new(args.messages);
    let mut connections = Vec::with_capacity(args.num_connections);

    // ========================================================================
    // Create and open
    // ========================================================================

    for _ in 0..args.num_connections {
        let connection = manager.create_connection(&args.server)?;

        connection.set_on_fail_callback(|_, connection| {
            warn!(
                id = %connection.id(),
                server = %connection.remote_server(),
                state = %connection.state(),
                error = connection.error_reason().unwrap_or_default(),
                "onFail callback"
            );
        })?;

        let on_open_messages = Arc::clone(&messages);
        connection.set_on_open_callback(move |messenger, connection| {
            debug!(
                id = %connection.id(),
                server = %connection.remote_server(),
                state = %connection.state(),
                "onOpen callback"
            );
            for message in on_open_messages.iter() {
                if let Err(e) = messenger.send(connection, message.as_str()) {
                    warn!(id = %connection.id(), error = %e, "Failed to send message");
                }
            }
        })?;

        let counter = Arc::clone(&received);
        let notify = Arc::clone(&reply);
        connection.set_on_message_callback(move |_, connection, text| {
            info!(id = %connection.id(), "Received: {text}");
            counter.fetch_add(1, Ordering::SeqCst);
            notify.notify_one();
        })?;

        connection.set_on_close_callback(|connection, event| {
            debug!(id = %connection.id(), ?event, "onClose callback");
        })?;

        manager.open(&connection)?;
        connections.push(connection);
    }

    // ========================================================================
    // Wait for handshakes
    // ========================================================================

    debug!("Waiting for the handshakes to complete");
    let report = manager
        .wait_settled(&connections, DEFAULT_HANDSHAKE_TIMEOUT)
        .await;
    info!(
        open = report.open.len(),
        failed = report.failed.len(),
        pending = report.pending.len(),
        "Handshakes settled"
    );

    // ========================================================================
    // Send
    // ========================================================================

    let mut expected = 0;
    for (index, connection) in connections.iter().enumerate() {
        if !connection.is_open() {
            debug!(
                id = %connection.id(),
                state = %connection.state(),
                "Connection is not open; skipping"
            );
            continue;
        }

        let sync_message = format!("### Message (SYNC) for connection {}", index + 1);
        manager.send(connection, sync_message)?;
        debug!(id = %connection.id(), "Message sent (SYNC)");
        expected += 1;
    }

    // ========================================================================
    // Wait for replies, then close
    // ========================================================================

    debug!(expected, "Waiting to receive messages from server");
    let replies = async {
        while received.load(Ordering::SeqCst) < expected {
            reply.notified().await;
        }
    };
    if timeout(REPLY_WINDOW, replies).await.is_err() {
        debug!(
            received = received.load(Ordering::SeqCst),
            "Reply window elapsed"
        );
    }

    debug!("About to close all connections");
    manager.close_all_connections().await;
    info!("Done");

    Ok(())
}
