//! # Resilient Rabbit Runtime
//!
//! The stateful half of the resilience layer.
//!
//! ## Core Components
//!
//! - **[`ConnectionManager`]**: owns the single logical broker connection,
//!   detects hard disconnects and re-establishes the connection in the
//!   background.
//! - **[`ConsumerContainer`]**: owns a set of [`ConsumerHolder`]s and keeps the
//!   enabled ones registered with the broker whenever a connection exists.
//! - **Delivery handling**: every registered consumer acknowledges a delivery
//!   after its callback succeeds and rejects it (without requeue) when the
//!   callback fails.
//!
//! ## Example
//!
//! ```no_run
//! use resilient_rabbit_core::{callback_fn, ConnectionConfig, ConnectionFactory, ConsumerDescriptor};
//! use resilient_rabbit_runtime::{ConnectionManager, ConsumerContainer};
//! use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn ConnectionFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(factory, ConnectionConfig::from_env()?);
//! let container = ConsumerContainer::new(manager.clone());
//!
//! container
//!     .add_consumer(
//!         Arc::new(callback_fn("invoice-mailer", |_message| async { Ok(()) })),
//!         ConsumerDescriptor::new("invoices").with_prefetch_count(10),
//!         4,
//!     )
//!     .await;
//! container.start_all_consumers().await?;
//!
//! // ... on shutdown
//! container.stop_all_consumers().await;
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

/// Connection lifecycle and reconnection
pub mod connection;

/// Consumer lifecycle across connection losses
pub mod container;

mod managed;

/// Prometheus metrics for observability
pub mod metrics;

/// Fixed-interval retry with cancellation
pub mod retry;

pub use connection::ConnectionManager;
pub use container::{ConsumerContainer, ConsumerHolder};
