//! Consumer configuration and the message callback contract.

use crate::broker::BoxFuture;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Prefetch count used when a descriptor does not set one.
pub const DEFAULT_PREFETCH_COUNT: u16 = 5;

/// Immutable configuration of one consumer registration.
///
/// # Example
///
/// ```
/// use resilient_rabbit_core::ConsumerDescriptor;
///
/// let descriptor = ConsumerDescriptor::new("orders")
///     .with_auto_ack(false)
///     .with_prefetch_count(20);
///
/// assert_eq!(descriptor.queue_name(), "orders");
/// assert_eq!(descriptor.prefetch_count(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    queue_name: String,
    auto_ack: bool,
    prefetch_count: u16,
}

impl ConsumerDescriptor {
    /// Consume from `queue_name` with manual acknowledgment and the default prefetch.
    #[must_use]
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            auto_ack: false,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
        }
    }

    /// Set whether the broker considers deliveries acknowledged on send.
    #[must_use]
    pub const fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Set the prefetch limit.
    #[must_use]
    pub const fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Queue to consume from.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Whether deliveries are auto-acknowledged.
    #[must_use]
    pub const fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Maximum unacknowledged deliveries per channel.
    #[must_use]
    pub const fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }
}

/// Called once for every delivered message.
///
/// One callback may back several consumer instances, so implementations are
/// invoked concurrently and must be thread-safe.
///
/// Returning `Err` (or panicking) makes a manually acknowledged consumer reject
/// the message without requeueing it. Returning `Ok` acknowledges it.
pub trait MessageCallback: Send + Sync {
    /// Process one message.
    fn handle_message(&self, message: Message) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Name used in logs and for looking up consumers by callback.
    ///
    /// Defaults to the implementing type's name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A [`MessageCallback`] backed by an async closure. See [`callback_fn`].
pub struct FnCallback<F> {
    name: String,
    f: F,
}

impl<F> std::fmt::Debug for FnCallback<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCallback").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Build a named [`MessageCallback`] from an async closure.
///
/// # Example
///
/// ```
/// use resilient_rabbit_core::{callback_fn, MessageCallback};
///
/// let callback = callback_fn("audit-log", |message| async move {
///     println!("{} bytes", message.body().len());
///     Ok(())
/// });
/// assert_eq!(callback.name(), "audit-log");
/// ```
pub fn callback_fn<F, Fut>(name: impl Into<String>, f: F) -> FnCallback<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnCallback {
        name: name.into(),
        f,
    }
}

impl<F, Fut> MessageCallback for FnCallback<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle_message(&self, message: Message) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin((self.f)(message))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
