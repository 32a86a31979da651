//! Property tests for the connection manager
//!
//! Random sequences of caller operations and broker faults must never leave
//! more than one live connection behind, and close must stay terminal.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use resilient_rabbit_core::{ConnectionConfig, ConnectionError, ConnectionState};
use resilient_rabbit_runtime::ConnectionManager;
use resilient_rabbit_testing::InMemoryBroker;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Op {
    Connect,
    Close,
    Kill,
    SoftError,
    Reachable(bool),
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Connect),
        1 => Just(Op::Close),
        3 => Just(Op::Kill),
        1 => Just(Op::SoftError),
        2 => any::<bool>().prop_map(Op::Reachable),
        3 => (0u64..3_000).prop_map(Op::Wait),
    ]
}

async fn run(ops: Vec<Op>) {
    let broker = InMemoryBroker::new();
    let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
    let mut closed = false;

    for op in ops {
        match op {
            Op::Connect => {
                let result = manager.connect().await;
                if closed {
                    assert_eq!(result.err(), Some(ConnectionError::Closed));
                } else if let Ok(connection) = result {
                    assert!(connection.is_open());
                    assert_eq!(manager.state(), ConnectionState::Connected);
                }
            }
            Op::Close => {
                manager.close().await;
                closed = true;
            }
            Op::Kill => broker.kill_connections(),
            Op::SoftError => broker.signal_soft_error(),
            Op::Reachable(reachable) => broker.set_reachable(reachable),
            Op::Wait(millis) => tokio::time::sleep(Duration::from_millis(millis)).await,
        }

        // Let background reconnection make progress.
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(broker.open_connection_count() <= 1);
        if closed {
            assert_eq!(manager.state(), ConnectionState::Closed);
            assert_eq!(broker.open_connection_count(), 0);
        }
    }

    manager.close().await;
    let attempts = broker.connection_attempts();
    broker.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(broker.connection_attempts(), attempts);
    assert_eq!(broker.open_connection_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_live_connection(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(run(ops));
    }
}

#[tokio::test(start_paused = true)]
async fn closed_manager_refuses_connect_after_faults() {
    let broker = InMemoryBroker::new();
    let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());

    tokio_test::assert_ok!(manager.connect().await.map(|_| ()));
    broker.kill_connections();
    manager.close().await;

    tokio_test::assert_err!(manager.connect().await.map(|_| ()));
    assert_eq!(manager.state(), ConnectionState::Closed);
}
