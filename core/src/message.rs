//! Messages exchanged with the broker.
//!
//! A [`Message`] is the payload plus the AMQP properties this layer cares about.
//! A [`Delivery`] wraps a message the broker pushed to a consumer together with
//! the envelope needed to acknowledge it. [`RoutingInfo`] tells a channel where
//! to publish.

use serde::{Deserialize, Serialize};

/// `text/plain` content type
pub const TEXT_PLAIN: &str = "text/plain";
/// `application/json` content type
pub const APPLICATION_JSON: &str = "application/json";
/// `application/xml` content type
pub const APPLICATION_XML: &str = "application/xml";

/// A message body with its properties.
///
/// # Example
///
/// ```
/// use resilient_rabbit_core::message::{Message, APPLICATION_JSON};
///
/// let message = Message::new(br#"{"id":1}"#.to_vec())
///     .with_id("order-1")
///     .with_content_type(APPLICATION_JSON)
///     .persistent();
///
/// assert_eq!(message.id(), Some("order-1"));
/// assert!(message.is_persistent());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    body: Vec<u8>,
    id: Option<String>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    persistent: bool,
    timestamp: Option<u64>,
}

impl Message {
    /// Create a transient message with the given body.
    #[must_use]
    pub const fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            id: None,
            content_type: None,
            content_encoding: None,
            persistent: false,
            timestamp: None,
        }
    }

    /// Set the message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the content encoding (charset).
    #[must_use]
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    /// Set the timestamp (seconds since the Unix epoch).
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark the message as persistent (delivery mode 2).
    #[must_use]
    pub const fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the message and return its body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Message id, if set.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Content type, if set.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Content encoding, if set.
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// Timestamp, if set.
    #[must_use]
    pub const fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Whether the message is persistent.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// A message delivered by the broker to a registered consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this delivery
    pub delivery_tag: u64,
    /// Consumer tag the broker assigned on registration
    pub consumer_tag: String,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
    /// The message itself
    pub message: Message,
}

impl Delivery {
    /// Identifier used in logs: the message id when present, the delivery tag otherwise.
    #[must_use]
    pub fn log_identifier(&self) -> String {
        self.message
            .id()
            .map_or_else(|| self.delivery_tag.to_string(), ToString::to_string)
    }
}

/// Where a channel should publish a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInfo {
    /// Target exchange (empty for the default exchange)
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Return the message if it cannot be routed
    pub mandatory: bool,
}

impl RoutingInfo {
    /// Route to an exchange with a routing key.
    #[must_use]
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
        }
    }

    /// Route directly to a queue through the default exchange.
    #[must_use]
    pub fn queue(queue: impl Into<String>) -> Self {
        Self::new("", queue)
    }

    /// Require the broker to route the message somewhere.
    #[must_use]
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}
