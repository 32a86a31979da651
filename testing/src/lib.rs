//! # Resilient Rabbit Testing
//!
//! Testing utilities for the resilient RabbitMQ client layer.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a deterministic broker implementing the collaborator
//!   traits, with fault injection and call recording
//! - Test helpers for tracing setup and polling assertions
//!
//! ## Example
//!
//! ```
//! use resilient_rabbit_testing::{InMemoryBroker, helpers::wait_until};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let broker = InMemoryBroker::new();
//! broker.declare_queue("orders");
//!
//! // ... start consumers against `broker`
//!
//! assert!(wait_until(Duration::from_secs(1), || broker.consumer_count("orders") == 0).await);
//! # }
//! ```

/// In-memory broker
pub mod broker;

/// Test helpers
pub mod helpers {
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honours `RUST_LOG`, defaulting to `warn`. Safe to call from every test.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` every 10ms until it holds or `timeout` elapses.
    ///
    /// Uses tokio time, so it works with paused clocks. Returns whether the
    /// condition was met.
    pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub use broker::{BrokerCall, InMemoryBroker, InMemoryChannel, InMemoryConnection};
pub use helpers::{init_test_tracing, wait_until};
