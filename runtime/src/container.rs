//! The consumer container: keeps registered consumers attached to the broker.
//!
//! A [`ConsumerContainer`] owns a set of [`ConsumerHolder`]s. Each holder pairs a
//! [`MessageCallback`] with a [`ConsumerDescriptor`] and tracks two flags:
//!
//! - **enabled**: user intent. Set by [`start_all_consumers`](ConsumerContainer::start_all_consumers),
//!   cleared by [`stop_all_consumers`](ConsumerContainer::stop_all_consumers). Survives reconnects.
//! - **active**: runtime fact. True only while the holder owns an open channel
//!   on which the broker accepted its subscription.
//!
//! The container listens to its [`ConnectionManager`]. Connection events are
//! queued to a single worker task so they are handled in order:
//!
//! - **established**: activate every enabled holder. If the batch fails (a
//!   queue's node may still be recovering after a failover), deactivate it and
//!   retry the whole batch every [`reactivation_interval`](ContainerConfig::reactivation_interval).
//! - **lost** / **closed**: deactivate every enabled holder.
//! - **channel lost**: the broker closed one holder's channel (channel-level
//!   error, consumer cancelled) while the connection stayed up. That holder is
//!   deactivated and re-registered through the same retry loop.
//!
//! Two locks order the work. The lifecycle lock serializes add / start / stop /
//! reset. The activation lock serializes every activate / deactivate sequence,
//! so the worker's reaction to a connection event cannot interleave with an
//! explicit stop.
//!
//! # Example
//!
//! ```no_run
//! use resilient_rabbit_core::{callback_fn, ConsumerDescriptor};
//! use resilient_rabbit_runtime::{ConnectionManager, ConsumerContainer};
//! use std::sync::Arc;
//!
//! # async fn example(manager: ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
//! let container = ConsumerContainer::new(manager);
//!
//! let callback = Arc::new(callback_fn("order-handler", |message| async move {
//!     println!("order: {} bytes", message.body().len());
//!     Ok(())
//! }));
//! container
//!     .add_consumer(callback, ConsumerDescriptor::new("orders"), 2)
//!     .await;
//!
//! container.start_all_consumers().await?;
//! assert_eq!(container.get_active_consumers().len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::connection::ConnectionManager;
use crate::managed::ManagedConsumer;
use crate::metrics::{CONSUMER_ACTIVATIONS, CONSUMER_ACTIVATION_FAILURES, CONSUMERS_ACTIVE};
use crate::retry::{RetryOutcome, retry_at_interval};
use ::metrics::{counter, gauge};
use resilient_rabbit_core::{
    BrokerError, Channel, Connection, ConnectionError, ConnectionListener, ConnectionState,
    ConsumerDescriptor, ConsumerError, ContainerConfig, ListenerId, MessageCallback,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError, RwLock};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

/// Manages a set of consumers across connection losses.
///
/// Dropping the container stops its event worker and unregisters it from the
/// connection manager. Active consumers stay registered until their channels
/// close; call [`stop_all_consumers`](Self::stop_all_consumers) first to detach them.
pub struct ConsumerContainer {
    inner: Arc<ContainerInner>,
    listener_id: ListenerId,
    worker: JoinHandle<()>,
}

struct ContainerInner {
    manager: ConnectionManager,
    config: ContainerConfig,
    holders: RwLock<Vec<Arc<ConsumerHolder>>>,
    /// Serializes add / start / stop / reset.
    lifecycle: Mutex<()>,
    /// Serializes activate / deactivate sequences.
    activation: Mutex<()>,
    /// Bumped by every event, stop and reset. A reactivation loop runs only
    /// while the generation it started with is current.
    generation: Arc<watch::Sender<u64>>,
    /// Handed to holders so their channels can report broker-side closes.
    events: EventSink,
}

#[derive(Debug)]
enum ContainerEvent {
    Established { generation: u64, address: String },
    Lost,
    Closed,
    ChannelLost {
        generation: u64,
        consumer_tag: String,
        reason: String,
    },
}

/// Queues events for the container's worker. Holds no reference to the
/// container itself.
#[derive(Clone)]
struct EventSink {
    events: mpsc::UnboundedSender<ContainerEvent>,
    generation: Arc<watch::Sender<u64>>,
}

impl EventSink {
    fn dispatch(&self, event: impl FnOnce(u64) -> ContainerEvent) {
        let generation = bump(&self.generation);
        if self.events.send(event(generation)).is_err() {
            tracing::debug!("Container worker stopped, dropping event");
        }
    }
}

/// Forwards connection manager transitions to the container's worker.
struct ContainerListener {
    sink: EventSink,
}

impl ConnectionListener for ContainerListener {
    fn on_established(&self, connection: &Arc<dyn Connection>) {
        let address = connection.address();
        self.sink.dispatch(|generation| ContainerEvent::Established {
            generation,
            address,
        });
    }

    fn on_lost(&self, _connection: Option<&Arc<dyn Connection>>) {
        self.sink.dispatch(|_| ContainerEvent::Lost);
    }

    fn on_closed(&self, _connection: Option<&Arc<dyn Connection>>) {
        self.sink.dispatch(|_| ContainerEvent::Closed);
    }
}

fn bump(generation: &watch::Sender<u64>) -> u64 {
    let mut next = 0;
    generation.send_modify(|current| {
        *current += 1;
        next = *current;
    });
    next
}

impl ConsumerContainer {
    /// Create a container with the default [`ContainerConfig`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self::with_config(manager, ContainerConfig::default())
    }

    /// Create a container, register it with `manager` and start its event worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_config(manager: ConnectionManager, config: ContainerConfig) -> Self {
        let (generation, _) = watch::channel(0);
        let generation = Arc::new(generation);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sink = EventSink {
            events: events_tx,
            generation: Arc::clone(&generation),
        };

        let inner = Arc::new(ContainerInner {
            manager: manager.clone(),
            config,
            holders: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
            activation: Mutex::new(()),
            generation,
            events: sink.clone(),
        });

        let listener_id = manager.register_listener(Arc::new(ContainerListener { sink }));
        let worker = tokio::spawn(run_events(Arc::clone(&inner), events_rx));

        tracing::debug!(listener = %listener_id, "Consumer container created");
        Self {
            inner,
            listener_id,
            worker,
        }
    }

    /// Add `instances` consumers that share `callback` and `descriptor`.
    ///
    /// The new holders start disabled; nothing is registered with the broker
    /// until the container is started. Returns the created holders.
    pub async fn add_consumer(
        &self,
        callback: Arc<dyn MessageCallback>,
        descriptor: ConsumerDescriptor,
        instances: usize,
    ) -> Vec<Arc<ConsumerHolder>> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let added: Vec<Arc<ConsumerHolder>> = (0..instances)
            .map(|_| {
                Arc::new(ConsumerHolder::new(
                    self.inner.manager.clone(),
                    self.inner.events.clone(),
                    Arc::clone(&callback),
                    descriptor.clone(),
                ))
            })
            .collect();

        self.inner.write_holders().extend(added.iter().cloned());
        tracing::info!(
            queue = descriptor.queue_name(),
            callback = callback.name(),
            instances,
            "Added consumer"
        );
        added
    }

    /// Add one consumer for `queue` with manual acknowledgment and the
    /// configured default prefetch count.
    pub async fn add_consumer_for_queue(
        &self,
        callback: Arc<dyn MessageCallback>,
        queue: impl Into<String>,
    ) -> Vec<Arc<ConsumerHolder>> {
        let descriptor = ConsumerDescriptor::new(queue)
            .with_prefetch_count(self.inner.config.default_prefetch_count);
        self.add_consumer(callback, descriptor, 1).await
    }

    /// Enable and activate every managed consumer.
    ///
    /// All queues are checked for existence before any state changes. If an
    /// activation fails partway, the consumers enabled by this call are
    /// disabled again.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Precondition`] if a queue does not exist; nothing is activated.
    /// - [`ConsumerError::Activation`] if the broker refused a registration.
    /// - [`ConsumerError::Connection`] if no connection could be obtained.
    pub async fn start_all_consumers(&self) -> Result<(), ConsumerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let holders = self.inner.snapshot();
        tracing::info!(consumers = holders.len(), "Starting all consumers");
        self.inner.enable(&holders).await
    }

    /// Disable and deactivate every managed consumer. Never fails.
    pub async fn stop_all_consumers(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        bump(&self.inner.generation);
        let holders = self.inner.snapshot();
        tracing::info!(consumers = holders.len(), "Stopping all consumers");
        self.inner.disable(&holders).await;
    }

    /// Stop all consumers and forget them.
    pub async fn reset(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        bump(&self.inner.generation);
        let holders = self.inner.snapshot();
        self.inner.disable(&holders).await;
        self.inner.write_holders().clear();
        tracing::info!(removed = holders.len(), "Reset consumer container");
    }

    /// Enable and activate the given consumers, after checking their queues exist.
    ///
    /// # Errors
    ///
    /// Same as [`start_all_consumers`](Self::start_all_consumers).
    pub async fn enable_consumers(&self, holders: &[Arc<ConsumerHolder>]) -> Result<(), ConsumerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.enable(holders).await
    }

    /// Disable and deactivate the given consumers.
    pub async fn disable_consumers(&self, holders: &[Arc<ConsumerHolder>]) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.disable(holders).await;
    }

    /// Consumers whose callback reports `name`.
    #[must_use]
    pub fn consumers_for_callback(&self, name: &str) -> Vec<Arc<ConsumerHolder>> {
        self.inner.filter(|holder| holder.callback_name() == name)
    }

    /// Snapshot of enabled consumers.
    #[must_use]
    pub fn get_enabled_consumers(&self) -> Vec<Arc<ConsumerHolder>> {
        self.inner.filter(|holder| holder.is_enabled())
    }

    /// Snapshot of disabled consumers.
    #[must_use]
    pub fn get_disabled_consumers(&self) -> Vec<Arc<ConsumerHolder>> {
        self.inner.filter(|holder| !holder.is_enabled())
    }

    /// Snapshot of active consumers: registered on a channel that is still open.
    #[must_use]
    pub fn get_active_consumers(&self) -> Vec<Arc<ConsumerHolder>> {
        self.inner.filter(|holder| holder.is_active())
    }

    /// Snapshot of inactive consumers.
    #[must_use]
    pub fn get_inactive_consumers(&self) -> Vec<Arc<ConsumerHolder>> {
        self.inner.filter(|holder| !holder.is_active())
    }

    /// All managed consumers in insertion order.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<ConsumerHolder>> {
        self.inner.snapshot()
    }

    /// Stop reacting to connection events. Consumers are left as they are.
    pub fn shutdown(&self) {
        if self.inner.manager.remove_listener(self.listener_id) {
            tracing::info!("Consumer container stopped listening to connection events");
        }
        self.worker.abort();
    }
}

impl Drop for ConsumerContainer {
    fn drop(&mut self) {
        self.inner.manager.remove_listener(self.listener_id);
        self.worker.abort();
    }
}

impl std::fmt::Debug for ConsumerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerContainer")
            .field("consumers", &self.inner.snapshot().len())
            .field("listener", &self.listener_id)
            .finish_non_exhaustive()
    }
}

async fn run_events(inner: Arc<ContainerInner>, mut events: mpsc::UnboundedReceiver<ContainerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ContainerEvent::Established {
                generation,
                address,
            } => {
                tracing::info!(address = %address, "Connection established");
                inner.reactivate(generation).await;
            }
            ContainerEvent::Lost => {
                tracing::warn!("Connection lost, deactivating enabled consumers");
                inner.deactivate_enabled().await;
            }
            ContainerEvent::Closed => {
                tracing::warn!("Connection closed for good, deactivating enabled consumers");
                inner.deactivate_enabled().await;
                break;
            }
            ContainerEvent::ChannelLost {
                generation,
                consumer_tag,
                reason,
            } => {
                tracing::warn!(consumer_tag = %consumer_tag, reason = %reason, "Consumer channel closed by broker");
                // While reconnecting, the next established event reactivates it.
                if inner.release_lost_channel(&consumer_tag).await
                    && inner.manager.state() == ConnectionState::Connected
                {
                    inner.reactivate(generation).await;
                }
            }
        }
    }
    tracing::debug!("Container event worker finished");
}

impl ContainerInner {
    fn snapshot(&self) -> Vec<Arc<ConsumerHolder>> {
        self.holders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_holders(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<ConsumerHolder>>> {
        self.holders.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn filter(&self, predicate: impl Fn(&ConsumerHolder) -> bool) -> Vec<Arc<ConsumerHolder>> {
        self.holders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|holder| predicate(holder))
            .cloned()
            .collect()
    }

    /// Must be called with the lifecycle lock held.
    async fn enable(&self, holders: &[Arc<ConsumerHolder>]) -> Result<(), ConsumerError> {
        self.check_preconditions(holders).await?;

        let _activation = self.activation.lock().await;
        for (index, holder) in holders.iter().enumerate() {
            if let Err(e) = holder.enable().await {
                tracing::error!(error = %e, "Failed to enable consumers, disabling already enabled consumers");
                for enabled in &holders[..=index] {
                    enabled.disable().await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Must be called with the lifecycle lock held.
    async fn disable(&self, holders: &[Arc<ConsumerHolder>]) {
        let _activation = self.activation.lock().await;
        for holder in holders {
            holder.disable().await;
        }
    }

    /// Check every distinct queue on a scratch channel.
    async fn check_preconditions(&self, holders: &[Arc<ConsumerHolder>]) -> Result<(), ConsumerError> {
        let mut seen = HashSet::new();
        let queues: Vec<&str> = holders
            .iter()
            .map(|holder| holder.descriptor().queue_name())
            .filter(|queue| seen.insert(*queue))
            .collect();
        if queues.is_empty() {
            return Ok(());
        }

        let connection = self.manager.connect().await?;
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ConnectionError::Unavailable(format!("unable to open channel: {e}")))?;

        let mut result = Ok(());
        for queue in queues {
            match channel.declare_queue_passive(queue).await {
                Ok(()) => tracing::debug!(queue, "Queue found on broker"),
                Err(source) => {
                    tracing::error!(queue, error = %source, "Queue not found on broker");
                    result = Err(ConsumerError::Precondition {
                        queue: queue.to_string(),
                        source,
                    });
                    break;
                }
            }
        }

        if let Err(e) = channel.close().await {
            tracing::debug!(error = %e, "Precondition channel already closed");
        }
        result
    }

    /// Reactivate enabled consumers after a connection was established,
    /// retrying until the batch succeeds or a newer event supersedes it.
    async fn reactivate(&self, generation: u64) {
        let current = self.generation.subscribe();
        if *current.borrow() != generation {
            tracing::debug!(generation, "Skipping superseded reactivation");
            return;
        }

        let outcome = retry_at_interval(
            "reactivate consumers",
            self.config.reactivation_interval,
            || self.activate_enabled_batch(),
            |_: &ConsumerError| true,
            || {
                let mut current = current.clone();
                async move {
                    let _ = current.wait_for(|g| *g != generation).await;
                }
            },
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded(count) => {
                tracing::info!(consumers = count, "Activated enabled consumers");
            }
            RetryOutcome::Failed(_) | RetryOutcome::Cancelled => {
                tracing::info!("Reactivation superseded, remaining consumers left inactive");
            }
        }
    }

    /// Activate every enabled holder that is not already registered. On failure
    /// the whole batch is deactivated.
    async fn activate_enabled_batch(&self) -> Result<usize, ConsumerError> {
        let _activation = self.activation.lock().await;
        let enabled = self.filter(ConsumerHolder::is_enabled);
        tracing::info!(consumers = enabled.len(), "Activating enabled consumers");

        for holder in &enabled {
            if holder.is_active() {
                continue;
            }
            if let Err(e) = holder.activate().await {
                tracing::error!(error = %e, "Failed to activate enabled consumers, deactivating batch");
                for activated in &enabled {
                    activated.deactivate().await;
                }
                return Err(e);
            }
        }
        Ok(enabled.len())
    }

    /// Deactivate the holder registered as `consumer_tag` if its channel is
    /// gone. Returns whether an enabled holder now needs reactivation.
    async fn release_lost_channel(&self, consumer_tag: &str) -> bool {
        let _activation = self.activation.lock().await;
        let lost = self.filter(|holder| {
            holder.consumer_tag().as_deref() == Some(consumer_tag) && !holder.is_active()
        });
        let mut needs_reactivation = false;
        for holder in lost {
            holder.deactivate().await;
            needs_reactivation |= holder.is_enabled();
        }
        needs_reactivation
    }

    async fn deactivate_enabled(&self) {
        let _activation = self.activation.lock().await;
        for holder in self.filter(ConsumerHolder::is_enabled) {
            holder.deactivate().await;
        }
    }
}

/// One consumer registration: a callback, its descriptor and runtime flags.
///
/// Holders are created by [`ConsumerContainer::add_consumer`] and always start
/// disabled and inactive. While active, a holder exclusively owns one channel.
pub struct ConsumerHolder {
    manager: ConnectionManager,
    events: EventSink,
    callback: Arc<dyn MessageCallback>,
    descriptor: ConsumerDescriptor,
    registration: SyncMutex<Option<Registration>>,
    enabled: AtomicBool,
    active: AtomicBool,
}

struct Registration {
    channel: Arc<dyn Channel>,
    consumer_tag: String,
}

impl ConsumerHolder {
    fn new(
        manager: ConnectionManager,
        events: EventSink,
        callback: Arc<dyn MessageCallback>,
        descriptor: ConsumerDescriptor,
    ) -> Self {
        Self {
            manager,
            events,
            callback,
            descriptor,
            registration: SyncMutex::new(None),
            enabled: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Configuration of this registration.
    #[must_use]
    pub const fn descriptor(&self) -> &ConsumerDescriptor {
        &self.descriptor
    }

    /// Name of the callback, see [`MessageCallback::name`].
    #[must_use]
    pub fn callback_name(&self) -> &str {
        self.callback.name()
    }

    /// Whether the user wants this consumer running.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether the broker currently delivers to this consumer: registered,
    /// and the owned channel is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self
                .lock_registration()
                .as_ref()
                .is_some_and(|registration| registration.channel.is_open())
    }

    /// Consumer tag assigned by the broker while active.
    #[must_use]
    pub fn consumer_tag(&self) -> Option<String> {
        self.lock_registration()
            .as_ref()
            .map(|registration| registration.consumer_tag.clone())
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, Option<Registration>> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn enable(&self) -> Result<(), ConsumerError> {
        self.enabled.store(true, Ordering::SeqCst);
        self.activate().await
    }

    pub(crate) async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.deactivate().await;
    }

    /// Register with the broker on a fresh channel. An active holder is
    /// deactivated first, so its old channel is closed.
    pub(crate) async fn activate(&self) -> Result<(), ConsumerError> {
        let queue = self.descriptor.queue_name();
        tracing::info!(queue, callback = self.callback_name(), "Activating consumer");
        if self.active.load(Ordering::SeqCst) {
            self.deactivate().await;
        }

        let result = self.register().await;
        match result {
            Ok(registration) => {
                let tag = registration.consumer_tag.clone();
                *self.lock_registration() = Some(registration);
                self.active.store(true, Ordering::SeqCst);
                counter!(CONSUMER_ACTIVATIONS).increment(1);
                gauge!(CONSUMERS_ACTIVE).increment(1.0);
                tracing::info!(queue, consumer_tag = %tag, callback = self.callback_name(), "Activated consumer");
                Ok(())
            }
            Err(e) => {
                counter!(CONSUMER_ACTIVATION_FAILURES).increment(1);
                tracing::error!(queue, callback = self.callback_name(), error = %e, "Failed to activate consumer");
                Err(e)
            }
        }
    }

    async fn register(&self) -> Result<Registration, ConsumerError> {
        let queue = self.descriptor.queue_name();
        let activation_error = |source: BrokerError| ConsumerError::Activation {
            queue: queue.to_string(),
            source,
        };

        let connection = self.manager.connect().await?;
        let channel = connection.open_channel().await.map_err(activation_error)?;

        let registered = match channel
            .set_prefetch_limit(self.descriptor.prefetch_count())
            .await
        {
            Ok(()) => {
                let handler = Arc::new(ManagedConsumer::new(
                    Arc::clone(&self.callback),
                    &channel,
                    queue,
                    self.descriptor.auto_ack(),
                ));
                channel
                    .register_consumer(queue, self.descriptor.auto_ack(), handler)
                    .await
            }
            Err(e) => Err(e),
        };

        match registered {
            Ok(consumer_tag) => {
                self.watch_channel(&channel, &consumer_tag);
                if channel.is_open() {
                    Ok(Registration {
                        channel,
                        consumer_tag,
                    })
                } else {
                    Err(activation_error(BrokerError::ChannelClosed(format!(
                        "channel closed right after registering {consumer_tag}"
                    ))))
                }
            }
            Err(source) => {
                if let Err(e) = channel.close().await {
                    tracing::debug!(queue, error = %e, "Channel of failed registration already closed");
                }
                Err(activation_error(source))
            }
        }
    }

    /// Report a broker-side close of `channel` to the container's worker.
    fn watch_channel(&self, channel: &Arc<dyn Channel>, consumer_tag: &str) {
        let events = self.events.clone();
        let consumer_tag = consumer_tag.to_string();
        channel.on_close(Box::new(move |signal| {
            let consumer_tag = consumer_tag.clone();
            events.dispatch(|generation| ContainerEvent::ChannelLost {
                generation,
                consumer_tag,
                reason: signal.reason,
            });
        }));
    }

    /// Close the owned channel and mark inactive. Never fails.
    pub(crate) async fn deactivate(&self) {
        let queue = self.descriptor.queue_name();
        let registration = self.lock_registration().take();
        if let Some(registration) = registration {
            tracing::debug!(queue, consumer_tag = %registration.consumer_tag, "Closing consumer channel");
            if let Err(e) = registration.channel.close().await {
                tracing::info!(queue, error = %e, "Aborted closing consumer channel (already closing)");
            }
        }
        if self.active.swap(false, Ordering::SeqCst) {
            gauge!(CONSUMERS_ACTIVE).decrement(1.0);
            tracing::info!(queue, callback = self.callback_name(), "Deactivated consumer");
        }
    }
}

impl std::fmt::Debug for ConsumerHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHolder")
            .field("callback", &self.callback_name())
            .field("descriptor", &self.descriptor)
            .field("enabled", &self.is_enabled())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
