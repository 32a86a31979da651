//! Broker client collaborators.
//!
//! The runtime never talks to a wire protocol directly. It consumes a broker
//! client through these four traits:
//!
//! - [`ConnectionFactory`] opens transport connections.
//! - [`Connection`] opens channels and reports shutdowns.
//! - [`Channel`] configures prefetch, probes queues, registers consumers,
//!   acknowledges deliveries and publishes.
//! - [`DeliveryHandler`] is the sink a channel pushes deliveries into.
//!
//! # Dyn Compatibility
//!
//! The traits return [`BoxFuture`] instead of using `async fn` so they can be used
//! as trait objects (`Arc<dyn Connection>`). The connection manager and the
//! consumer container hold collaborators exclusively through trait objects.

use crate::config::ConnectionConfig;
use crate::error::BrokerError;
use crate::message::{Delivery, Message, RoutingInfo};
use std::sync::Arc;

pub use futures::future::BoxFuture;

/// Whether a shutdown affected the whole transport or a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Transport-level failure: the connection is gone
    Hard,
    /// Channel-level (application) error: the connection survives
    Soft,
}

/// Notification that a connection or one of its channels shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    /// Hard or soft
    pub kind: ShutdownKind,
    /// Human-readable reason reported by the broker client
    pub reason: String,
}

impl ShutdownSignal {
    /// A transport-level shutdown.
    #[must_use]
    pub fn hard(reason: impl Into<String>) -> Self {
        Self {
            kind: ShutdownKind::Hard,
            reason: reason.into(),
        }
    }

    /// A channel-level shutdown.
    #[must_use]
    pub fn soft(reason: impl Into<String>) -> Self {
        Self {
            kind: ShutdownKind::Soft,
            reason: reason.into(),
        }
    }

    /// Whether this signal means the connection is lost.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(self.kind, ShutdownKind::Hard)
    }
}

/// Callback invoked by a [`Connection`] or [`Channel`] when it shuts down.
///
/// Listeners may run on a thread owned by the broker client; they must not block.
pub type ShutdownListener = Box<dyn Fn(ShutdownSignal) + Send + Sync>;

/// Receives deliveries for one registered consumer.
///
/// A channel invokes the handler once per delivered message, one at a time.
pub trait DeliveryHandler: Send + Sync {
    /// Handle one delivery. Acknowledgment is the handler's responsibility.
    fn handle_delivery(&self, delivery: Delivery) -> BoxFuture<'_, ()>;
}

/// A broker channel.
///
/// Channels are owned exclusively by one consumer registration at a time.
pub trait Channel: Send + Sync {
    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;

    /// Limit the number of unacknowledged deliveries buffered client-side.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker rejects the setting or the channel is closed.
    fn set_prefetch_limit(&self, prefetch_count: u16) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Check that a queue exists without creating it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::QueueNotFound`] if the queue does not exist.
    fn declare_queue_passive<'a>(&'a self, queue: &'a str)
    -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Register `handler` as a consumer of `queue` and return the consumer tag.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker refuses the registration.
    fn register_consumer<'a>(
        &'a self,
        queue: &'a str,
        auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BoxFuture<'a, Result<String, BrokerError>>;

    /// Positively acknowledge a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the acknowledgment cannot be sent.
    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Negatively acknowledge a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the acknowledgment cannot be sent.
    fn nack(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the message cannot be sent.
    fn publish<'a>(
        &'a self,
        routing: &'a RoutingInfo,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Close the channel, cancelling its consumers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the channel was already closed or closing failed.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe to closes the application did not ask for: a channel-level
    /// error or a broker-side consumer cancellation. Reported as a soft signal.
    ///
    /// A [`close`](Self::close) by the application does not notify. A listener
    /// registered on an already closed channel is never called.
    fn on_close(&self, listener: ShutdownListener);
}

/// A transport connection to the broker.
pub trait Connection: Send + Sync {
    /// Broker address, for logging.
    fn address(&self) -> String;

    /// Whether the transport is still open.
    fn is_open(&self) -> bool;

    /// Open a new channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the connection is closed or the broker refuses.
    fn open_channel(&self) -> BoxFuture<'_, Result<Arc<dyn Channel>, BrokerError>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the connection was already closed or closing failed.
    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe to shutdown notifications.
    ///
    /// An application-initiated [`close`](Self::close) does not produce a hard signal.
    fn on_shutdown(&self, listener: ShutdownListener);
}

/// Opens broker connections.
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection using the host, port, credentials, heartbeat and
    /// timeout from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the broker is unreachable or
    /// refuses the connection.
    fn open_connection<'a>(
        &'a self,
        config: &'a ConnectionConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, BrokerError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_and_soft_signals() {
        assert!(ShutdownSignal::hard("socket closed").is_hard());
        assert!(!ShutdownSignal::soft("PRECONDITION_FAILED").is_hard());
    }

    #[test]
    fn traits_are_dyn_compatible() {
        fn assert_dyn(
            _: Option<&dyn ConnectionFactory>,
            _: Option<&dyn Connection>,
            _: Option<&dyn Channel>,
            _: Option<&dyn DeliveryHandler>,
        ) {
        }
        assert_dyn(None, None, None, None);
    }
}
