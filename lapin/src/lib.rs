//! `lapin` adapter for the resilient RabbitMQ client layer.
//!
//! This crate implements the collaborator traits from `resilient-rabbit-core`
//! on top of [lapin](https://docs.rs/lapin), an AMQP 0-9-1 client:
//!
//! - [`LapinConnectionFactory`] opens connections from a [`ConnectionConfig`]
//! - [`LapinConnection`] reports transport errors as hard shutdown signals
//! - [`LapinChannel`] maps prefetch, passive declares, consumers, acks and
//!   publishes onto the corresponding AMQP methods
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐    ┌────────────────────┐
//! │ ConnectionManager  │    │ ConsumerContainer  │
//! └─────────┬──────────┘    └─────────┬──────────┘
//!           │ ConnectionFactory       │ Channel
//!           ▼                         ▼
//! ┌─────────────────────────────────────────────┐
//! │        resilient-rabbit-lapin (this)        │
//! └──────────────────────┬──────────────────────┘
//!                        ▼
//!                  lapin / RabbitMQ
//! ```
//!
//! # Example
//!
//! ```no_run
//! use resilient_rabbit_core::ConnectionConfig;
//! use resilient_rabbit_lapin::LapinConnectionFactory;
//! use resilient_rabbit_runtime::ConnectionManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::from_env()?;
//! let manager = ConnectionManager::new(Arc::new(LapinConnectionFactory::new()), config);
//! let connection = manager.connect().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, ConnectionProperties};
use resilient_rabbit_core::{
    BoxFuture, BrokerError, Channel, Connection, ConnectionConfig, ConnectionFactory, Delivery,
    DeliveryHandler, Message, RoutingInfo, ShutdownListener, ShutdownSignal,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections.
#[derive(Clone, Default)]
pub struct LapinConnectionFactory {
    properties: ConnectionProperties,
}

impl std::fmt::Debug for LapinConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LapinConnectionFactory").finish_non_exhaustive()
    }
}

impl LapinConnectionFactory {
    /// Factory with default connection properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with custom connection properties (client name, executor, ...).
    #[must_use]
    pub const fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

impl ConnectionFactory for LapinConnectionFactory {
    fn open_connection<'a>(
        &'a self,
        config: &'a ConnectionConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Connection>, BrokerError>> {
        Box::pin(async move {
            let uri = amqp_uri(config);
            let inner = lapin::Connection::connect(&uri, self.properties.clone())
                .await
                .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
            tracing::debug!(address = %config.address(), "Opened AMQP connection");

            let connection: Arc<dyn Connection> = Arc::new(LapinConnection {
                inner,
                address: config.address(),
            });
            Ok(connection)
        })
    }
}

/// Build the AMQP URI for `config`, carrying heartbeat and connect timeout.
#[must_use]
pub fn amqp_uri(config: &ConnectionConfig) -> String {
    format!(
        "amqp://{}:{}@{}:{}/{}?heartbeat={}&connection_timeout={}",
        urlencoding::encode(&config.credentials.username),
        urlencoding::encode(&config.credentials.password),
        config.host,
        config.port,
        urlencoding::encode(&config.virtual_host),
        config.heartbeat.as_secs(),
        config.connect_timeout.as_millis(),
    )
}

/// A lapin connection.
pub struct LapinConnection {
    inner: lapin::Connection,
    address: String,
}

impl Connection for LapinConnection {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    fn open_channel(&self) -> BoxFuture<'_, Result<Arc<dyn Channel>, BrokerError>> {
        Box::pin(async move {
            let inner = self.inner.create_channel().await.map_err(|e| broker_error(&e))?;
            let channel: Arc<dyn Channel> = Arc::new(LapinChannel {
                inner,
                watch: Arc::new(ChannelWatch::default()),
            });
            Ok(channel)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.inner
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| broker_error(&e))
        })
    }

    fn on_shutdown(&self, listener: ShutdownListener) {
        // lapin only reports connection-level failures here; channel errors
        // close the channel alone.
        self.inner
            .on_error(move |err| listener(ShutdownSignal::hard(err.to_string())));
    }
}

/// A lapin channel.
pub struct LapinChannel {
    inner: lapin::Channel,
    watch: Arc<ChannelWatch>,
}

/// Close listeners of one channel, shared with its consumer stream tasks.
#[derive(Default)]
struct ChannelWatch {
    closing: AtomicBool,
    listeners: Mutex<Vec<ShutdownListener>>,
}

impl ChannelWatch {
    /// Report a close the application did not ask for, at most once.
    fn notify(&self, reason: String) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner));
        let signal = ShutdownSignal::soft(reason);
        for listener in &listeners {
            listener(signal.clone());
        }
    }
}

impl Channel for LapinChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    fn set_prefetch_limit(&self, prefetch_count: u16) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.inner
                .basic_qos(prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| broker_error(&e))
        })
    }

    fn declare_queue_passive<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = QueueDeclareOptions {
                passive: true,
                ..QueueDeclareOptions::default()
            };
            match self
                .inner
                .queue_declare(queue, options, FieldTable::default())
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => Err(BrokerError::QueueNotFound(queue.to_string())),
                Err(e) => Err(broker_error(&e)),
            }
        })
    }

    fn register_consumer<'a>(
        &'a self,
        queue: &'a str,
        auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BoxFuture<'a, Result<String, BrokerError>> {
        Box::pin(async move {
            let options = BasicConsumeOptions {
                no_ack: auto_ack,
                ..BasicConsumeOptions::default()
            };
            // An empty tag lets the broker assign one.
            let mut consumer = self
                .inner
                .basic_consume(queue, "", options, FieldTable::default())
                .await
                .map_err(|e| broker_error(&e))?;
            let consumer_tag = consumer.tag().as_str().to_string();

            let tag = consumer_tag.clone();
            let queue_name = queue.to_string();
            let watch = Arc::clone(&self.watch);
            tokio::spawn(async move {
                while let Some(next) = consumer.next().await {
                    match next {
                        Ok(delivery) => handler.handle_delivery(convert_delivery(delivery, &tag)).await,
                        Err(e) => {
                            tracing::warn!(queue = %queue_name, consumer_tag = %tag, error = %e, "Consumer stream failed");
                            break;
                        }
                    }
                }
                tracing::debug!(queue = %queue_name, consumer_tag = %tag, "Consumer stream ended");
                // Ends on a channel error or a broker-side cancel unless we closed it.
                watch.notify(format!("consumer {tag} on queue {queue_name} stopped by broker"));
            });

            Ok(consumer_tag)
        })
    }

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.inner
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .map_err(|e| broker_error(&e))
        })
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            };
            self.inner
                .basic_nack(delivery_tag, options)
                .await
                .map_err(|e| broker_error(&e))
        })
    }

    fn publish<'a>(
        &'a self,
        routing: &'a RoutingInfo,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let options = BasicPublishOptions {
                mandatory: routing.mandatory,
                ..BasicPublishOptions::default()
            };
            let confirm = self
                .inner
                .basic_publish(
                    &routing.exchange,
                    &routing.routing_key,
                    options,
                    message.body(),
                    properties_for(message),
                )
                .await
                .map_err(|e| broker_error(&e))?;
            confirm.await.map_err(|e| broker_error(&e))?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.watch.closing.store(true, Ordering::SeqCst);
            self.inner
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| broker_error(&e))
        })
    }

    fn on_close(&self, listener: ShutdownListener) {
        if self.watch.closing.load(Ordering::SeqCst) {
            return;
        }
        self.watch
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

fn is_not_found(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
    )
}

fn broker_error(err: &lapin::Error) -> BrokerError {
    match err {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed(err.to_string())
        }
        lapin::Error::IOError(_) => BrokerError::ConnectionFailed(err.to_string()),
        _ => BrokerError::Other(err.to_string()),
    }
}

fn properties_for(message: &Message) -> BasicProperties {
    let mut properties = BasicProperties::default();
    if let Some(id) = message.id() {
        properties = properties.with_message_id(ShortString::from(id));
    }
    if let Some(content_type) = message.content_type() {
        properties = properties.with_content_type(ShortString::from(content_type));
    }
    if let Some(encoding) = message.content_encoding() {
        properties = properties.with_content_encoding(ShortString::from(encoding));
    }
    if let Some(timestamp) = message.timestamp() {
        properties = properties.with_timestamp(timestamp);
    }
    if message.is_persistent() {
        properties = properties.with_delivery_mode(2);
    }
    properties
}

fn message_from(body: Vec<u8>, properties: &BasicProperties) -> Message {
    let mut message = Message::new(body);
    if let Some(id) = properties.message_id() {
        message = message.with_id(id.as_str());
    }
    if let Some(content_type) = properties.content_type() {
        message = message.with_content_type(content_type.as_str());
    }
    if let Some(encoding) = properties.content_encoding() {
        message = message.with_content_encoding(encoding.as_str());
    }
    if let Some(timestamp) = properties.timestamp() {
        message = message.with_timestamp(*timestamp);
    }
    if *properties.delivery_mode() == Some(2) {
        message = message.persistent();
    }
    message
}

fn convert_delivery(delivery: lapin::message::Delivery, consumer_tag: &str) -> Delivery {
    let message = message_from(delivery.data, &delivery.properties);
    Delivery {
        delivery_tag: delivery.delivery_tag,
        consumer_tag: consumer_tag.to_string(),
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        redelivered: delivery.redelivered,
        message,
    }
}
