//! In-memory broker for deterministic tests
//!
//! [`InMemoryBroker`] implements [`ConnectionFactory`] and hands out
//! connections and channels that behave like a single-node broker:
//!
//! - Queues must be declared with [`InMemoryBroker::declare_queue`]; a passive
//!   declaration of a missing queue fails and closes the channel.
//! - Consumers receive deliveries via [`InMemoryBroker::deliver`] (round-robin
//!   across a queue's consumers) or via `publish` to the default exchange.
//! - Faults are injected explicitly: unreachable broker, refused connection
//!   attempts, hard disconnects, channel-level errors and consumer
//!   cancellations, failing consumer registrations.
//! - Acks, nacks, prefetch settings and closes are recorded as [`BrokerCall`]s.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use resilient_rabbit_core::{
    BoxFuture, BrokerError, Channel, Connection, ConnectionConfig, ConnectionFactory, Delivery,
    DeliveryHandler, Message, RoutingInfo, ShutdownListener, ShutdownSignal,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A broker-side operation observed by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    /// Prefetch limit set on a channel
    Qos {
        /// Channel id
        channel: u64,
        /// Requested limit
        prefetch_count: u16,
    },
    /// Consumer registered
    Consume {
        /// Channel id
        channel: u64,
        /// Queue consumed from
        queue: String,
        /// Assigned consumer tag
        consumer_tag: String,
    },
    /// Positive acknowledgment
    Ack {
        /// Channel id
        channel: u64,
        /// Acknowledged delivery
        delivery_tag: u64,
    },
    /// Negative acknowledgment
    Nack {
        /// Channel id
        channel: u64,
        /// Rejected delivery
        delivery_tag: u64,
        /// Whether the message was requeued
        requeue: bool,
    },
    /// Message published
    Publish {
        /// Target exchange
        exchange: String,
        /// Routing key
        routing_key: String,
    },
    /// Channel closed by the client
    ChannelClosed {
        /// Channel id
        channel: u64,
    },
    /// Channel closed by the broker after a channel-level error
    ChannelFailed {
        /// Channel id
        channel: u64,
    },
    /// Connection closed by the client
    ConnectionClosed {
        /// Connection id
        connection: u64,
    },
}

/// In-memory broker for testing.
///
/// Cheap to clone; clones share the same broker.
///
/// # Example
///
/// ```
/// use resilient_rabbit_testing::InMemoryBroker;
/// use resilient_rabbit_core::{ConnectionConfig, ConnectionFactory};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.declare_queue("orders");
///
/// let connection = broker.open_connection(&ConnectionConfig::default()).await?;
/// let channel = connection.open_channel().await?;
/// channel.declare_queue_passive("orders").await?;
/// assert!(channel.declare_queue_passive("missing").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    unreachable: bool,
    refused_connects: usize,
    connection_attempts: usize,
    next_id: u64,
    next_delivery_tag: u64,
    connections: Vec<Arc<ConnectionShared>>,
    channels: Vec<Arc<ChannelShared>>,
    queues: HashMap<String, QueueState>,
    calls: Vec<BrokerCall>,
}

#[derive(Default)]
struct QueueState {
    consumers: Vec<RegisteredConsumer>,
    next_consumer: usize,
    failing_registrations: usize,
}

struct RegisteredConsumer {
    consumer_tag: String,
    channel: u64,
    handler: Arc<dyn DeliveryHandler>,
}

struct ConnectionShared {
    id: u64,
    open: AtomicBool,
    listeners: Mutex<Vec<ShutdownListener>>,
}

impl ConnectionShared {
    fn notify(&self, signal: &ShutdownSignal) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(signal.clone());
        }
    }
}

struct ChannelShared {
    id: u64,
    connection: u64,
    open: AtomicBool,
    listeners: Mutex<Vec<ShutdownListener>>,
}

impl ChannelShared {
    fn notify(&self, signal: &ShutdownSignal) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(signal.clone());
        }
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Mark a channel closed and cancel its consumers. Returns whether it was open.
    fn close_channel(&mut self, channel: &ChannelShared) -> bool {
        if !channel.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|consumer| consumer.channel != channel.id);
        }
        true
    }

    fn close_channels_of(&mut self, connection: u64) {
        let channels: Vec<Arc<ChannelShared>> = self
            .channels
            .iter()
            .filter(|channel| channel.connection == connection)
            .cloned()
            .collect();
        for channel in channels {
            self.close_channel(&channel);
        }
        self.channels.retain(|channel| channel.open.load(Ordering::SeqCst));
    }
}

impl InMemoryBroker {
    /// Create a reachable broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the broker (un)reachable for new connection attempts.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: usize) {
        self.state.lock().unwrap().refused_connects = count;
    }

    /// Create a queue. Declaring an existing queue is a no-op.
    pub fn declare_queue(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(name.to_string())
            .or_default();
    }

    /// Delete a queue, cancelling its consumers.
    pub fn delete_queue(&self, name: &str) {
        self.state.lock().unwrap().queues.remove(name);
    }

    /// Fail the next `count` consumer registrations on `queue`, declaring it if needed.
    pub fn fail_next_consumer_registrations(&self, queue: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default()
            .failing_registrations = count;
    }

    /// Drop every open connection as a network failure would.
    ///
    /// Connections and their channels are closed, consumers are cancelled, and
    /// every shutdown listener receives a hard signal.
    pub fn kill_connections(&self) {
        let killed: Vec<Arc<ConnectionShared>> = {
            let mut state = self.state.lock().unwrap();
            let open: Vec<Arc<ConnectionShared>> = state
                .connections
                .iter()
                .filter(|connection| connection.open.swap(false, Ordering::SeqCst))
                .cloned()
                .collect();
            for connection in &open {
                state.close_channels_of(connection.id);
            }
            state
                .connections
                .retain(|connection| connection.open.load(Ordering::SeqCst));
            open
        };

        let signal = ShutdownSignal::hard("connection reset by peer");
        for connection in killed {
            connection.notify(&signal);
        }
    }

    /// Raise a channel-level error.
    ///
    /// The oldest open channel that carries a consumer is closed, as the broker
    /// does after `PRECONDITION_FAILED`, and its listeners are notified. Every
    /// open connection then receives a soft signal; connections stay open.
    pub fn signal_soft_error(&self) {
        let failing = {
            let state = self.state.lock().unwrap();
            state
                .channels
                .iter()
                .find(|channel| {
                    channel.open.load(Ordering::SeqCst)
                        && state
                            .queues
                            .values()
                            .any(|queue| queue.consumers.iter().any(|c| c.channel == channel.id))
                })
                .cloned()
        };
        let signal = ShutdownSignal::soft("PRECONDITION_FAILED - unknown delivery tag");
        if let Some(channel) = failing {
            self.fail_channel(&channel, &signal);
        }

        let open: Vec<Arc<ConnectionShared>> = self.state.lock().unwrap().connections.clone();
        for connection in open {
            connection.notify(&signal);
        }
    }

    /// Cancel the consumer with `consumer_tag` from the broker side, closing
    /// its channel. Returns whether such a consumer was registered.
    pub fn cancel_consumer(&self, consumer_tag: &str) -> bool {
        let channel = {
            let state = self.state.lock().unwrap();
            let owner = state
                .queues
                .values()
                .flat_map(|queue| queue.consumers.iter())
                .find(|consumer| consumer.consumer_tag == consumer_tag)
                .map(|consumer| consumer.channel);
            owner.and_then(|id| state.channels.iter().find(|channel| channel.id == id).cloned())
        };
        match channel {
            Some(channel) => {
                self.fail_channel(&channel, &ShutdownSignal::soft(format!("consumer {consumer_tag} cancelled")));
                true
            }
            None => false,
        }
    }

    /// Close `channel` broker-side and notify its listeners outside the state lock.
    fn fail_channel(&self, channel: &ChannelShared, signal: &ShutdownSignal) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.close_channel(channel) {
                return;
            }
            state.channels.retain(|open| open.id != channel.id);
            state.calls.push(BrokerCall::ChannelFailed { channel: channel.id });
        }
        channel.notify(signal);
    }

    /// Deliver `message` to the next consumer of `queue` and wait for its
    /// handler to finish. Returns the delivery tag, or `None` if the queue has
    /// no consumer.
    pub async fn deliver(&self, queue: &str, message: Message) -> Option<u64> {
        let (handler, delivery) = {
            let mut state = self.state.lock().unwrap();
            state.next_delivery_tag += 1;
            let delivery_tag = state.next_delivery_tag;
            let entry = state.queues.get_mut(queue)?;
            if entry.consumers.is_empty() {
                return None;
            }
            let index = entry.next_consumer % entry.consumers.len();
            entry.next_consumer = index + 1;
            let consumer = &entry.consumers[index];
            let delivery = Delivery {
                delivery_tag,
                consumer_tag: consumer.consumer_tag.clone(),
                exchange: String::new(),
                routing_key: queue.to_string(),
                redelivered: false,
                message,
            };
            (Arc::clone(&consumer.handler), delivery)
        };

        let tag = delivery.delivery_tag;
        handler.handle_delivery(delivery).await;
        Some(tag)
    }

    /// All recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Acknowledged delivery tags.
    #[must_use]
    pub fn acks(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Ack { delivery_tag, .. } => Some(delivery_tag),
                _ => None,
            })
            .collect()
    }

    /// Rejected delivery tags with their requeue flag.
    #[must_use]
    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Nack {
                    delivery_tag,
                    requeue,
                    ..
                } => Some((delivery_tag, requeue)),
                _ => None,
            })
            .collect()
    }

    /// Number of connection attempts, successful or not.
    #[must_use]
    pub fn connection_attempts(&self) -> usize {
        self.state.lock().unwrap().connection_attempts
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connection_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .filter(|connection| connection.open.load(Ordering::SeqCst))
            .count()
    }

    /// Channels currently open, across all connections.
    #[must_use]
    pub fn open_channel_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|channel| channel.open.load(Ordering::SeqCst))
            .count()
    }

    /// Consumers currently registered on `queue`.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, |entry| entry.consumers.len())
    }

    fn record(&self, call: BrokerCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("open_connections", &self.open_connection_count())
            .field("open_channels", &self.open_channel_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory for InMemoryBroker {
    fn open_connection<'a>(
        &'a self,
        config: &'a ConnectionConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, BrokerError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.connection_attempts += 1;
            if state.unreachable {
                return Err(BrokerError::ConnectionFailed(format!(
                    "{}: connection refused",
                    config.address()
                )));
            }
            if state.refused_connects > 0 {
                state.refused_connects -= 1;
                return Err(BrokerError::ConnectionFailed(format!(
                    "{}: connection refused",
                    config.address()
                )));
            }

            let shared = Arc::new(ConnectionShared {
                id: state.next_id(),
                open: AtomicBool::new(true),
                listeners: Mutex::new(Vec::new()),
            });
            state.connections.push(Arc::clone(&shared));
            let connection: Arc<dyn Connection> = Arc::new(InMemoryConnection {
                shared,
                address: config.address(),
                broker: self.clone(),
            });
            Ok(connection)
        })
    }
}

/// Connection handed out by [`InMemoryBroker`].
pub struct InMemoryConnection {
    shared: Arc<ConnectionShared>,
    address: String,
    broker: InMemoryBroker,
}

impl Connection for InMemoryConnection {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn open_channel(&self) -> BoxFuture<'_, Result<Arc<dyn Channel>, BrokerError>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(BrokerError::ChannelClosed("connection is closed".to_string()));
            }
            let mut state = self.broker.state.lock().unwrap();
            let shared = Arc::new(ChannelShared {
                id: state.next_id(),
                connection: self.shared.id,
                open: AtomicBool::new(true),
                listeners: Mutex::new(Vec::new()),
            });
            state.channels.push(Arc::clone(&shared));
            let channel: Arc<dyn Channel> = Arc::new(InMemoryChannel {
                shared,
                broker: self.broker.clone(),
            });
            Ok(channel)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !self.shared.open.swap(false, Ordering::SeqCst) {
                return Err(BrokerError::ConnectionFailed("connection already closed".to_string()));
            }
            let mut state = self.broker.state.lock().unwrap();
            state.close_channels_of(self.shared.id);
            state.connections.retain(|connection| connection.id != self.shared.id);
            state.calls.push(BrokerCall::ConnectionClosed {
                connection: self.shared.id,
            });
            Ok(())
        })
    }

    fn on_shutdown(&self, listener: ShutdownListener) {
        self.shared.listeners.lock().unwrap().push(listener);
    }
}

/// Channel handed out by [`InMemoryConnection`].
pub struct InMemoryChannel {
    shared: Arc<ChannelShared>,
    broker: InMemoryBroker,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed(format!("channel {} is closed", self.shared.id)))
        }
    }

    /// Close the channel the way a broker does after a channel-level error.
    fn close_on_error(&self) {
        let mut state = self.broker.state.lock().unwrap();
        state.close_channel(&self.shared);
        state.channels.retain(|channel| channel.id != self.shared.id);
    }
}

impl Channel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn set_prefetch_limit(&self, prefetch_count: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.broker.record(BrokerCall::Qos {
                channel: self.shared.id,
                prefetch_count,
            });
            Ok(())
        })
    }

    fn declare_queue_passive<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let exists = self.broker.state.lock().unwrap().queues.contains_key(queue);
            if exists {
                Ok(())
            } else {
                self.close_on_error();
                Err(BrokerError::QueueNotFound(queue.to_string()))
            }
        })
    }

    fn register_consumer<'a>(
        &'a self,
        queue: &'a str,
        _auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BoxFuture<'a, Result<String, BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let refused = {
                let mut state = self.broker.state.lock().unwrap();
                let consumer_tag = format!("ctag-{}", state.next_id());
                match state.queues.get_mut(queue) {
                    None => BrokerError::QueueNotFound(queue.to_string()),
                    Some(entry) if entry.failing_registrations > 0 => {
                        entry.failing_registrations -= 1;
                        BrokerError::Other(format!("home node of queue '{queue}' is unavailable"))
                    }
                    Some(entry) => {
                        entry.consumers.push(RegisteredConsumer {
                            consumer_tag: consumer_tag.clone(),
                            channel: self.shared.id,
                            handler,
                        });
                        state.calls.push(BrokerCall::Consume {
                            channel: self.shared.id,
                            queue: queue.to_string(),
                            consumer_tag: consumer_tag.clone(),
                        });
                        return Ok(consumer_tag);
                    }
                }
            };

            self.close_on_error();
            Err(refused)
        })
    }

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.broker.record(BrokerCall::Ack {
                channel: self.shared.id,
                delivery_tag,
            });
            Ok(())
        })
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.broker.record(BrokerCall::Nack {
                channel: self.shared.id,
                delivery_tag,
                requeue,
            });
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        routing: &'a RoutingInfo,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.broker.record(BrokerCall::Publish {
                exchange: routing.exchange.clone(),
                routing_key: routing.routing_key.clone(),
            });
            if routing.exchange.is_empty() {
                let broker = self.broker.clone();
                let queue = routing.routing_key.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    broker.deliver(&queue, message).await;
                });
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.broker.state.lock().unwrap();
            if !state.close_channel(&self.shared) {
                return Err(BrokerError::ChannelClosed(format!(
                    "channel {} already closed",
                    self.shared.id
                )));
            }
            state.channels.retain(|channel| channel.id != self.shared.id);
            state.calls.push(BrokerCall::ChannelClosed {
                channel: self.shared.id,
            });
            Ok(())
        })
    }

    fn on_close(&self, listener: ShutdownListener) {
        self.shared.listeners.lock().unwrap().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Discard;

    impl DeliveryHandler for Discard {
        fn handle_delivery(&self, _delivery: Delivery) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn refused_connects_are_counted() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connects(2);
        let config = ConnectionConfig::default();

        assert!(broker.open_connection(&config).await.is_err());
        assert!(broker.open_connection(&config).await.is_err());
        assert!(broker.open_connection(&config).await.is_ok());
        assert_eq!(broker.connection_attempts(), 3);
        assert_eq!(broker.open_connection_count(), 1);
    }

    #[tokio::test]
    async fn missing_queue_closes_the_channel() {
        let broker = InMemoryBroker::new();
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let channel = connection.open_channel().await.unwrap();

        let err = channel.declare_queue_passive("nope").await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!channel.is_open());
        assert_eq!(broker.open_channel_count(), 0);
    }

    #[tokio::test]
    async fn kill_fires_hard_signal_and_cancels_consumers() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q");
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let signals = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&signals);
        connection.on_shutdown(Box::new(move |signal| seen.lock().unwrap().push(signal)));
        let channel = connection.open_channel().await.unwrap();
        channel.register_consumer("q", false, Arc::new(Discard)).await.unwrap();

        broker.kill_connections();

        assert!(!connection.is_open());
        assert!(!channel.is_open());
        assert_eq!(broker.consumer_count("q"), 0);
        assert_eq!(signals.lock().unwrap().len(), 1);
        assert!(signals.lock().unwrap()[0].is_hard());
    }

    #[tokio::test]
    async fn failing_registration_is_consumed_once() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q");
        broker.fail_next_consumer_registrations("q", 1);
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();

        let first = connection.open_channel().await.unwrap();
        assert!(first.register_consumer("q", false, Arc::new(Discard)).await.is_err());
        assert!(!first.is_open());

        let second = connection.open_channel().await.unwrap();
        assert!(second.register_consumer("q", false, Arc::new(Discard)).await.is_ok());
        assert_eq!(broker.consumer_count("q"), 1);
    }

    #[tokio::test]
    async fn deliver_round_robins_across_consumers() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q");
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let channel = connection.open_channel().await.unwrap();
        channel.register_consumer("q", false, Arc::new(Discard)).await.unwrap();
        channel.register_consumer("q", false, Arc::new(Discard)).await.unwrap();

        assert_eq!(broker.deliver("q", Message::default()).await, Some(1));
        assert_eq!(broker.deliver("q", Message::default()).await, Some(2));
        assert_eq!(broker.deliver("empty", Message::default()).await, None);
    }

    fn record_signals(channel: &Arc<dyn Channel>) -> Arc<Mutex<Vec<ShutdownSignal>>> {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&signals);
        channel.on_close(Box::new(move |signal| seen.lock().unwrap().push(signal)));
        signals
    }

    #[tokio::test]
    async fn soft_error_closes_a_consuming_channel() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q");
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let idle = connection.open_channel().await.unwrap();
        let consuming = connection.open_channel().await.unwrap();
        consuming.register_consumer("q", false, Arc::new(Discard)).await.unwrap();
        let signals = record_signals(&consuming);

        broker.signal_soft_error();

        assert!(connection.is_open());
        assert!(idle.is_open());
        assert!(!consuming.is_open());
        assert_eq!(broker.consumer_count("q"), 0);
        let signals = signals.lock().unwrap();
        assert_eq!(signals.len(), 1);
        assert!(!signals[0].is_hard());
    }

    #[tokio::test]
    async fn cancelled_consumer_notifies_its_channel_only_once() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q");
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let channel = connection.open_channel().await.unwrap();
        let tag = channel.register_consumer("q", false, Arc::new(Discard)).await.unwrap();
        let signals = record_signals(&channel);

        assert!(broker.cancel_consumer(&tag));
        assert!(!broker.cancel_consumer(&tag));

        assert!(!channel.is_open());
        assert_eq!(signals.lock().unwrap().len(), 1);
        assert!(broker.calls().contains(&BrokerCall::ChannelFailed { channel: 2 }));
    }

    #[tokio::test]
    async fn client_close_does_not_notify() {
        let broker = InMemoryBroker::new();
        let connection = broker.open_connection(&ConnectionConfig::default()).await.unwrap();
        let channel = connection.open_channel().await.unwrap();
        let signals = record_signals(&channel);

        channel.close().await.unwrap();

        assert!(signals.lock().unwrap().is_empty());
    }
}
