#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use cthun_client::{
    CloseInitiator, ConnectionManager, ConnectionRef, ConnectionState, Error,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{MockEngine, fixture, init_tracing, mock_manager};

const SETTLE: Duration = Duration::from_secs(2);

/// Callback names in invocation order.
type Journal = Arc<Mutex<Vec<&'static str>>>;

fn record_callbacks(connection: &ConnectionRef) -> Journal {
    let journal: Journal = Arc::default();

    let log = Arc::clone(&journal);
    connection
        .set_on_open_callback(move |_, _| log.lock().push("open"))
        .unwrap();
    let log = Arc::clone(&journal);
    connection
        .set_on_fail_callback(move |_, _| log.lock().push("fail"))
        .unwrap();
    let log = Arc::clone(&journal);
    connection
        .set_on_message_callback(move |_, _, _| log.lock().push("message"))
        .unwrap();
    let log = Arc::clone(&journal);
    connection
        .set_on_close_callback(move |_, _| log.lock().push("close"))
        .unwrap();

    journal
}

/// `true` if `calls` is a prefix of `[open|fail], message*, close`.
fn is_ordered_prefix(calls: &[&str]) -> bool {
    let Some((first, rest)) = calls.split_first() else {
        return true;
    };

    match *first {
        "fail" => rest.is_empty(),
        "open" => {
            let messages = rest.iter().take_while(|call| **call == "message").count();
            match &rest[messages..] {
                [] | ["close"] => true,
                _ => false,
            }
        }
        _ => false,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn three_connections_open_send_and_close() {
    init_tracing();
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
    let mut connections = Vec::new();

    for _ in 0..3 {
        let connection = manager.create_connection("wss://broker.test:8090/cthun/").unwrap();
        let opened = opened_tx.clone();
        connection
            .set_on_open_callback(move |_, connection| {
                let _ = opened.send(connection.id());
            })
            .unwrap();
        connections.push(connection);
    }

    for connection in &connections {
        manager.open(connection).unwrap();
    }

    for _ in 0..3 {
        timeout(SETTLE, opened_rx.recv()).await.unwrap().unwrap();
    }

    for (i, connection) in connections.iter().enumerate() {
        assert!(connection.is_open());
        manager.send(connection, format!("payload {i}")).unwrap();
    }

    let sent = engine.sent();
    assert_eq!(sent.len(), 3);
    for (i, connection) in connections.iter().enumerate() {
        assert!(sent.contains(&(connection.id(), format!("payload {i}"))));
    }

    manager.close_all_connections().await;

    assert_eq!(manager.connection_count(), 0);
    assert_eq!(engine.closes(), 3);
    for connection in &connections {
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}

#[tokio::test]
async fn missing_ca_blocks_connections_until_reconfigured() {
    let manager = ConnectionManager::builder()
        .engine(MockEngine::new())
        .build()
        .unwrap();

    let err = manager
        .configure_secure_endpoint(
            fixture("does_not_exist.pem"),
            fixture("client_crt.pem"),
            fixture("client_key.pem"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));

    let err = manager
        .create_connection("wss://broker.test:8090/cthun/")
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionViolated { .. }));

    common::configure(&manager);
    let connection = manager
        .create_connection("wss://broker.test:8090/cthun/")
        .unwrap();
    manager.open(&connection).unwrap();
    assert_eq!(connection.settled().await, ConnectionState::Open);
}

#[tokio::test]
async fn unreachable_host_fails_with_reason() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://fail.test:8090/").unwrap();
    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel();
    connection
        .set_on_fail_callback(move |_, connection| {
            let _ = failed_tx.send(connection.error_reason());
        })
        .unwrap();

    manager.open(&connection).unwrap();

    let reason = timeout(SETTLE, failed_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!reason.is_empty());
    assert_eq!(connection.state(), ConnectionState::Failed);

    let err = manager.send(&connection, "hello").unwrap_err();
    assert!(matches!(
        err,
        Error::NotOpen {
            state: ConnectionState::Failed,
            ..
        }
    ));
    assert!(engine.sent().is_empty());
}

#[tokio::test]
async fn close_all_twice() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connections: Vec<_> = (0..2)
        .map(|_| manager.create_connection("wss://broker.test/").unwrap())
        .collect();
    for connection in &connections {
        manager.open(connection).unwrap();
    }
    assert!(manager.wait_settled(&connections, SETTLE).await.all_open());

    manager.close_all_connections().await;
    assert_eq!(manager.connection_count(), 0);
    assert_eq!(engine.closes(), 2);

    manager.close_all_connections().await;
    assert_eq!(engine.closes(), 2);
}

#[tokio::test]
async fn close_all_on_empty_manager_does_nothing() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    manager.close_all_connections().await;
    assert_eq!(engine.connects(), 0);
    assert_eq!(engine.closes(), 0);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn second_open_is_already_open() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    // While the handshake is running
    let pending = manager.create_connection("wss://hang.test/").unwrap();
    manager.open(&pending).unwrap();
    assert!(matches!(
        manager.open(&pending).unwrap_err(),
        Error::AlreadyOpen { .. }
    ));

    // After it succeeded
    let open = manager.create_connection("wss://broker.test/").unwrap();
    manager.open(&open).unwrap();
    open.settled().await;
    assert!(matches!(
        manager.open(&open).unwrap_err(),
        Error::AlreadyOpen { .. }
    ));

    assert_eq!(engine.connects(), 2);
}

#[tokio::test]
async fn send_after_close_never_reaches_transport() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://broker.test/").unwrap();
    manager.open(&connection).unwrap();
    connection.settled().await;
    manager.send(&connection, "before").unwrap();

    manager.close_all_connections().await;

    for _ in 0..3 {
        assert!(matches!(
            manager.send(&connection, "after").unwrap_err(),
            Error::NotOpen {
                state: ConnectionState::Closed,
                ..
            }
        ));
    }
    assert_eq!(engine.sent().len(), 1);
}

#[tokio::test]
async fn error_reason_only_when_failed() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let hosts = ["wss://broker.test/", "wss://fail.test/", "wss://hang.test/"];
    let connections: Vec<_> = hosts
        .iter()
        .map(|url| manager.create_connection(url).unwrap())
        .collect();
    for connection in &connections {
        manager.open(connection).unwrap();
    }

    // Handshake timeout is 200ms, so the hanging one fails too
    let report = manager.wait_settled(&connections, SETTLE).await;
    assert!(report.all_settled());
    assert_eq!(report.open, vec![connections[0].id()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(connections[2].error_reason().as_deref(), Some("timeout"));

    manager.close_all_connections().await;

    for connection in &connections {
        let (state, reason) = connection.snapshot();
        assert_eq!(state == ConnectionState::Failed, reason.is_some());
    }
    // Failed stays Failed through teardown
    assert_eq!(connections[1].state(), ConnectionState::Failed);
    assert_eq!(connections[0].state(), ConnectionState::Closed);
}

#[tokio::test]
async fn callbacks_follow_lifecycle_order() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let opened = manager.create_connection("wss://broker.test/").unwrap();
    let failed = manager.create_connection("wss://fail.test/").unwrap();
    let aborted = manager.create_connection("wss://hang.test/").unwrap();

    let opened_log = record_callbacks(&opened);
    let failed_log = record_callbacks(&failed);
    let aborted_log = record_callbacks(&aborted);

    manager.open(&opened).unwrap();
    manager.open(&failed).unwrap();
    manager.open(&aborted).unwrap();

    // Messages pushed right after open are queued behind the open event
    opened.settled().await;
    engine.push(opened.id(), "one");
    manager.send(&opened, "two").unwrap();
    failed.settled().await;

    manager.close_all_connections().await;

    assert_eq!(*opened_log.lock(), ["open", "message", "message", "close"]);
    assert_eq!(*failed_log.lock(), ["fail"]);
    assert!(aborted_log.lock().is_empty());

    for log in [&opened_log, &failed_log, &aborted_log] {
        assert!(is_ordered_prefix(&log.lock()));
    }
}

#[tokio::test]
async fn remote_close_fires_close_once() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://broker.test/").unwrap();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    connection
        .set_on_close_callback(move |_, event| {
            let _ = closed_tx.send(event.clone());
        })
        .unwrap();

    manager.open(&connection).unwrap();
    connection.settled().await;

    engine.drop_remote(connection.id(), "server restart");

    let event = timeout(SETTLE, closed_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.initiator, CloseInitiator::Remote);
    assert_eq!(event.reason.as_deref(), Some("server restart"));
    assert_eq!(connection.closed().await, ConnectionState::Closed);

    manager.close_all_connections().await;
    assert!(closed_rx.try_recv().is_err());
}

#[tokio::test]
async fn callbacks_can_reply_through_messenger() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://broker.test/").unwrap();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

    connection
        .set_on_open_callback(|messenger, connection| {
            messenger.send(connection, "hello from open").unwrap();
        })
        .unwrap();
    connection
        .set_on_message_callback(move |_, _, text| {
            let _ = reply_tx.send(text.to_string());
        })
        .unwrap();

    manager.open(&connection).unwrap();

    let echoed = timeout(SETTLE, reply_rx.recv()).await.unwrap().unwrap();
    assert_eq!(echoed, "hello from open");

    manager.close_all_connections().await;
}

#[tokio::test]
async fn callback_registration_after_open_rejected() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://broker.test/").unwrap();
    manager.open(&connection).unwrap();

    let err = connection.set_on_open_callback(|_, _| {}).unwrap_err();
    assert!(matches!(err, Error::PreconditionViolated { .. }));
}

#[tokio::test]
async fn dropped_connection_is_not_found() {
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let connection = manager.create_connection("wss://broker.test/").unwrap();
    manager.close_all_connections().await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(manager.connection(connection.id()).is_none());
    assert!(matches!(
        manager.open(&connection).unwrap_err(),
        Error::ConnectionNotFound { .. }
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lifecycles_race_close_all() {
    init_tracing();
    let engine = MockEngine::new();
    let manager = mock_manager(&engine);

    let mut tasks = Vec::new();
    for i in 0..200 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let host = if i % 5 == 0 { "fail.test" } else { "broker.test" };
            let connection = manager.create_connection(&format!("wss://{host}/")).ok()?;
            let journal = record_callbacks(&connection);

            if manager.open(&connection).is_ok() {
                tokio::task::yield_now().await;
                let _ = manager.send(&connection, format!("payload {i}"));
            }

            Some((connection, journal))
        }));
    }

    let closer = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.close_all_connections().await })
    };

    let mut finished = Vec::new();
    for task in tasks {
        if let Some(entry) = task.await.unwrap() {
            finished.push(entry);
        }
    }
    closer.await.unwrap();

    // Connections created after the racing close_all are still registered
    manager.close_all_connections().await;
    assert_eq!(manager.connection_count(), 0);

    // Handles released by late handshake results are closed in the background
    timeout(SETTLE, async {
        while engine.closes() < engine.opened() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(engine.closes(), engine.opened());

    for (connection, journal) in &finished {
        assert_ne!(connection.state(), ConnectionState::Open);
        let calls = journal.lock().clone();
        assert!(is_ordered_prefix(&calls), "{}: {calls:?}", connection.id());
    }
}
