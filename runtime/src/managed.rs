//! Delivery handling for registered consumers.
//!
//! [`ManagedConsumer`] is what the container registers with a channel. It runs
//! the user callback for each delivery and, for manually acknowledged
//! consumers, acknowledges on success and rejects (without requeue) on failure.
//! A failing or panicking callback never stops the consumer.

use crate::metrics::{MESSAGES_ACKED, MESSAGES_NACKED};
use ::metrics::counter;
use futures::FutureExt;
use resilient_rabbit_core::{BoxFuture, Channel, Delivery, DeliveryHandler, MessageCallback};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

/// Bridges broker deliveries to a [`MessageCallback`].
pub(crate) struct ManagedConsumer {
    callback: Arc<dyn MessageCallback>,
    /// Weak: the channel owns its registered handlers.
    channel: Weak<dyn Channel>,
    queue: String,
    auto_ack: bool,
}

impl ManagedConsumer {
    pub(crate) fn new(
        callback: Arc<dyn MessageCallback>,
        channel: &Arc<dyn Channel>,
        queue: impl Into<String>,
        auto_ack: bool,
    ) -> Self {
        Self {
            callback,
            channel: Arc::downgrade(channel),
            queue: queue.into(),
            auto_ack,
        }
    }

    async fn process(&self, delivery: Delivery) {
        let tag = delivery.delivery_tag;
        let id = delivery.log_identifier();
        tracing::debug!(
            queue = %self.queue,
            message = %id,
            callback = self.callback.name(),
            "Received message"
        );

        let outcome = AssertUnwindSafe(self.callback.handle_message(delivery.message))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(_) => Some("callback panicked".to_string()),
        };

        if let Some(reason) = &failure {
            tracing::error!(
                queue = %self.queue,
                message = %id,
                callback = self.callback.name(),
                error = %reason,
                "Error while handling message"
            );
        }

        if self.auto_ack {
            return;
        }

        let Some(channel) = self.channel.upgrade() else {
            tracing::warn!(queue = %self.queue, message = %id, "Channel gone before acknowledgment");
            return;
        };

        if failure.is_none() {
            match channel.ack(tag).await {
                Ok(()) => {
                    counter!(MESSAGES_ACKED).increment(1);
                    tracing::debug!(queue = %self.queue, message = %id, "Acknowledged message");
                }
                Err(e) => {
                    tracing::error!(queue = %self.queue, message = %id, error = %e, "Unable to acknowledge message");
                }
            }
        } else {
            match channel.nack(tag, false).await {
                Ok(()) => {
                    counter!(MESSAGES_NACKED).increment(1);
                    tracing::debug!(queue = %self.queue, message = %id, "Rejected message");
                }
                Err(e) => {
                    tracing::error!(queue = %self.queue, message = %id, error = %e, "Unable to reject message");
                }
            }
        }
    }
}

impl DeliveryHandler for ManagedConsumer {
    fn handle_delivery(&self, delivery: Delivery) -> BoxFuture<'_, ()> {
        Box::pin(self.process(delivery))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use resilient_rabbit_core::{BrokerError, Message, RoutingInfo, ShutdownListener, callback_fn};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Channel for RecordingChannel {
        fn is_open(&self) -> bool {
            true
        }

        fn set_prefetch_limit(&self, _prefetch_count: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
            Box::pin(async { Ok(()) })
        }

        fn declare_queue_passive<'a>(
            &'a self,
            _queue: &'a str,
        ) -> BoxFuture<'a, Result<(), BrokerError>> {
            Box::pin(async { Ok(()) })
        }

        fn register_consumer<'a>(
            &'a self,
            _queue: &'a str,
            _auto_ack: bool,
            _handler: Arc<dyn DeliveryHandler>,
        ) -> BoxFuture<'a, Result<String, BrokerError>> {
            Box::pin(async { Ok("ctag".to_string()) })
        }

        fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), BrokerError>> {
            self.record(format!("ack {delivery_tag}"));
            Box::pin(async { Ok(()) })
        }

        fn nack(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
            self.record(format!("nack {delivery_tag} {requeue}"));
            Box::pin(async { Ok(()) })
        }

        fn publish<'a>(
            &'a self,
            _routing: &'a RoutingInfo,
            _message: &'a Message,
        ) -> BoxFuture<'a, Result<(), BrokerError>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
            Box::pin(async { Ok(()) })
        }

        fn on_close(&self, _listener: ShutdownListener) {}
    }

    fn delivery(tag: u64) -> Delivery {
        Delivery {
            delivery_tag: tag,
            consumer_tag: "ctag".to_string(),
            exchange: String::new(),
            routing_key: "q".to_string(),
            redelivered: false,
            message: Message::new(b"payload".to_vec()),
        }
    }

    fn managed(
        callback: Arc<dyn MessageCallback>,
        auto_ack: bool,
    ) -> (Arc<RecordingChannel>, ManagedConsumer) {
        let recording = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn Channel> = recording.clone();
        let consumer = ManagedConsumer::new(callback, &channel, "q", auto_ack);
        (recording, consumer)
    }

    #[tokio::test]
    async fn success_is_acknowledged() {
        let (channel, consumer) = managed(Arc::new(callback_fn("ok", |_| async { Ok(()) })), false);

        consumer.handle_delivery(delivery(7)).await;

        assert_eq!(channel.calls(), vec!["ack 7".to_string()]);
    }

    #[tokio::test]
    async fn failure_is_rejected_without_requeue() {
        let (channel, consumer) = managed(
            Arc::new(callback_fn("failing", |_| async { Err(anyhow::anyhow!("boom")) })),
            false,
        );

        consumer.handle_delivery(delivery(3)).await;

        assert_eq!(channel.calls(), vec!["nack 3 false".to_string()]);
    }

    fn buggy_handler() -> anyhow::Result<()> {
        panic!("callback bug")
    }

    #[tokio::test]
    async fn panic_is_rejected_and_contained() {
        let (channel, consumer) = managed(
            Arc::new(callback_fn("panicking", |_| async { buggy_handler() })),
            false,
        );

        consumer.handle_delivery(delivery(1)).await;
        consumer.handle_delivery(delivery(2)).await;

        assert_eq!(channel.calls(), vec!["nack 1 false".to_string(), "nack 2 false".to_string()]);
    }

    #[tokio::test]
    async fn auto_ack_sends_nothing() {
        let (channel, consumer) = managed(
            Arc::new(callback_fn("failing", |_| async { Err(anyhow::anyhow!("boom")) })),
            true,
        );

        consumer.handle_delivery(delivery(9)).await;

        assert!(channel.calls().is_empty());
    }
}
