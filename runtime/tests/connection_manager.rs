//! Integration tests for the connection manager
//!
//! Drives [`ConnectionManager`] against the in-memory broker: first connect,
//! idempotent retrieval, hard and soft shutdowns, background reconnection,
//! and terminal close.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use resilient_rabbit_core::{
    Connection, ConnectionConfig, ConnectionError, ConnectionListener, ConnectionState,
};
use resilient_rabbit_runtime::ConnectionManager;
use resilient_rabbit_testing::{InMemoryBroker, init_test_tracing, wait_until};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| **e == event).count()
    }
}

impl ConnectionListener for RecordingListener {
    fn on_established(&self, _connection: &Arc<dyn Connection>) {
        self.events.lock().unwrap().push("established");
    }

    fn on_lost(&self, _connection: Option<&Arc<dyn Connection>>) {
        self.events.lock().unwrap().push("lost");
    }

    fn on_closed(&self, _connection: Option<&Arc<dyn Connection>>) {
        self.events.lock().unwrap().push("closed");
    }
}

struct PanickingListener;

impl ConnectionListener for PanickingListener {
    fn on_established(&self, _connection: &Arc<dyn Connection>) {
        panic!("listener bug");
    }

    fn on_lost(&self, _connection: Option<&Arc<dyn Connection>>) {
        panic!("listener bug");
    }

    fn on_closed(&self, _connection: Option<&Arc<dyn Connection>>) {
        panic!("listener bug");
    }
}

fn setup() -> (InMemoryBroker, ConnectionManager) {
    init_test_tracing();
    let broker = InMemoryBroker::new();
    let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
    (broker, manager)
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) -> bool {
    wait_until(Duration::from_secs(30), || manager.state() == state).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn connect_reuses_the_live_connection() {
    let (broker, manager) = setup();
    assert_eq!(manager.state(), ConnectionState::NeverConnected);

    let first = manager.connect().await.unwrap();
    let second = manager.connect().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(broker.connection_attempts(), 1);
    assert_eq!(broker.open_connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_first_connect_can_be_retried_by_caller() {
    let (broker, manager) = setup();
    broker.set_reachable(false);

    let err = manager.connect().await.err().expect("connect should fail");
    assert!(matches!(err, ConnectionError::Establish { .. }));
    assert!(err.is_retryable());
    assert_eq!(manager.state(), ConnectionState::NeverConnected);

    broker.set_reachable(true);
    assert!(manager.connect().await.is_ok());
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn close_is_terminal_and_idempotent() {
    let (broker, manager) = setup();
    let listener = Arc::new(RecordingListener::default());
    manager.register_listener(listener.clone());
    manager.connect().await.unwrap();

    manager.close().await;
    manager.close().await;

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(listener.count("closed"), 1);
    assert_eq!(broker.open_connection_count(), 0);
    assert_eq!(manager.connect().await.err(), Some(ConnectionError::Closed));
}

#[tokio::test(start_paused = true)]
async fn close_before_connect_is_terminal() {
    let (broker, manager) = setup();

    manager.close().await;

    assert_eq!(manager.connect().await.err(), Some(ConnectionError::Closed));
    assert_eq!(broker.connection_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn hard_disconnect_reconnects_in_background() {
    let (broker, manager) = setup();
    let listener = Arc::new(RecordingListener::default());
    manager.register_listener(listener.clone());
    let original = manager.connect().await.unwrap();

    broker.refuse_next_connects(3);
    broker.kill_connections();

    assert!(
        wait_until(Duration::from_secs(30), || listener.count("established") == 2).await,
        "manager did not reconnect"
    );
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(listener.count("lost"), 1);
    // One initial attempt, three refused, one successful.
    assert_eq!(broker.connection_attempts(), 5);
    assert_eq!(broker.open_connection_count(), 1);

    let replacement = manager.connect().await.unwrap();
    assert!(!Arc::ptr_eq(&original, &replacement));
    assert!(replacement.is_open());
}

#[tokio::test(start_paused = true)]
async fn soft_errors_do_not_trigger_reconnection() {
    let (broker, manager) = setup();
    let listener = Arc::new(RecordingListener::default());
    manager.register_listener(listener.clone());
    let connection = manager.connect().await.unwrap();

    broker.signal_soft_error();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(listener.count("lost"), 0);
    assert_eq!(broker.connection_attempts(), 1);
    assert!(Arc::ptr_eq(&connection, &manager.connect().await.unwrap()));
}

#[tokio::test(start_paused = true)]
async fn close_stops_the_reconnect_loop() {
    let (broker, manager) = setup();
    manager.connect().await.unwrap();

    broker.set_reachable(false);
    broker.kill_connections();
    assert!(wait_for_state(&manager, ConnectionState::Connecting).await);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(broker.connection_attempts() > 2, "reconnect loop should be retrying");

    manager.close().await;
    let attempts_at_close = broker.connection_attempts();
    broker.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(broker.connection_attempts(), attempts_at_close);
    assert_eq!(broker.open_connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_makes_its_own_attempt() {
    let (broker, manager) = setup();
    manager.connect().await.unwrap();

    broker.set_reachable(false);
    broker.kill_connections();
    assert!(wait_for_state(&manager, ConnectionState::Connecting).await);

    assert!(matches!(
        manager.connect().await,
        Err(ConnectionError::Establish { .. })
    ));

    broker.set_reachable(true);
    assert!(manager.connect().await.is_ok());
    assert_eq!(manager.state(), ConnectionState::Connected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(broker.open_connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_corrupt_state() {
    let (broker, manager) = setup();
    let listener = Arc::new(RecordingListener::default());
    manager.register_listener(Arc::new(PanickingListener));
    manager.register_listener(listener.clone());

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(listener.count("established"), 1);

    broker.kill_connections();
    assert!(wait_until(Duration::from_secs(30), || listener.count("established") == 2).await);

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(listener.count("closed"), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_listener_is_not_notified() {
    let (_broker, manager) = setup();
    let listener = Arc::new(RecordingListener::default());
    let id = manager.register_listener(listener.clone());

    assert!(manager.remove_listener(id));
    assert!(!manager.remove_listener(id));

    manager.connect().await.unwrap();
    manager.close().await;
    assert!(listener.events.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let (broker, manager) = setup();
    let mut states = manager.watch_state();

    manager.connect().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    broker.set_reachable(false);
    broker.kill_connections();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

    manager.close().await;
    states.changed().await.unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Closed);
}
