//! The connection manager: one logical broker connection per process.
//!
//! [`ConnectionManager`] hands out a single shared connection, establishing it
//! on first use. When the broker reports a hard (transport-level) shutdown, the
//! manager moves to [`ConnectionState::Connecting`] and a background task retries
//! establishment every [`reconnect_interval`](ConnectionConfig::reconnect_interval)
//! until it succeeds or the manager is closed. Soft (channel-level) shutdowns
//! never trigger reconnection.
//!
//! # State machine
//!
//! ```text
//!                  connect() ok
//! NeverConnected ───────────────▶ Connected ◀──────┐
//!        │                         │  hard        │ retry ok
//!        │                         ▼  shutdown    │
//!        │                      Connecting ───────┘
//!        │                         │
//!        └──────── close() ────────┴──────────▶ Closed (terminal)
//! ```
//!
//! Every transition happens under one async mutex (the connection operation
//! lock), so two tasks can never establish two connections at once, and a
//! connection is never established concurrently with `close()`. The retry loop
//! waits outside that lock; `close()` therefore always gets through and the
//! loop observes `Closed` at its next boundary.
//!
//! # Example
//!
//! ```no_run
//! use resilient_rabbit_core::ConnectionConfig;
//! use resilient_rabbit_runtime::ConnectionManager;
//! # use resilient_rabbit_core::ConnectionFactory;
//! # use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn ConnectionFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(factory, ConnectionConfig::default());
//! let connection = manager.connect().await?;
//! let channel = connection.open_channel().await?;
//! // ...
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

use crate::metrics::{CONNECTIONS_ESTABLISHED, CONNECTIONS_LOST, RECONNECT_ATTEMPTS};
use crate::retry::{RetryOutcome, retry_at_interval};
use ::metrics::counter;
use resilient_rabbit_core::{
    BoxFuture, BrokerError, Connection, ConnectionConfig, ConnectionError, ConnectionFactory,
    ConnectionListener, ConnectionState, ListenerId, ShutdownSignal,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, watch};

/// Owns the single logical broker connection.
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn ConnectionFactory>,
    config: ConnectionConfig,
    /// The connection operation lock.
    slot: Mutex<Slot>,
    /// Mirror of `Slot::state` for lock-free reads and for waking the retry loop on close.
    state: watch::Sender<ConnectionState>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ConnectionListener>)>>,
    next_listener_id: AtomicU64,
}

struct Slot {
    state: ConnectionState,
    /// `Some` exactly when `state == Connected`.
    connection: Option<Arc<dyn Connection>>,
    /// Bumped for every established connection; stale shutdown signals are ignored.
    generation: u64,
}

/// A transition listeners are told about.
enum Transition<'a> {
    Established(&'a Arc<dyn Connection>),
    Lost(Option<&'a Arc<dyn Connection>>),
    Closed(Option<&'a Arc<dyn Connection>>),
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::NeverConnected);
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                slot: Mutex::new(Slot {
                    state: ConnectionState::NeverConnected,
                    connection: None,
                    generation: 0,
                }),
                state,
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Return the live connection, establishing it first if none exists.
    ///
    /// Repeated calls while connected return the same connection instance.
    /// While a reconnect is in progress this makes one establishment attempt of
    /// its own (serialized with the background loop).
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Closed`] if the manager has been closed.
    /// - [`ConnectionError::Establish`] if an establishment attempt failed.
    /// - [`ConnectionError::Unavailable`] if the current connection is no longer
    ///   open and the loss has not been processed yet.
    pub async fn connect(&self) -> Result<Arc<dyn Connection>, ConnectionError> {
        let mut slot = self.inner.slot.lock().await;
        let state = slot.state;
        match state {
            ConnectionState::Closed => Err(ConnectionError::Closed),
            ConnectionState::Connected => match &slot.connection {
                Some(connection) if connection.is_open() => Ok(Arc::clone(connection)),
                _ => {
                    tracing::error!(address = %self.inner.config.address(), "Unable to retrieve connection");
                    Err(ConnectionError::Unavailable(
                        "connection is no longer open".to_string(),
                    ))
                }
            },
            ConnectionState::NeverConnected | ConnectionState::Connecting => {
                self.inner.establish(&mut slot).await
            }
        }
    }

    /// Close the manager and its connection, and notify listeners.
    ///
    /// Terminal: afterwards [`connect`](Self::connect) always fails with
    /// [`ConnectionError::Closed`], and an in-flight reconnect loop exits at its
    /// next boundary. Calling `close` again only logs a warning.
    pub async fn close(&self) {
        let mut slot = self.inner.slot.lock().await;
        if slot.state == ConnectionState::Closed {
            tracing::warn!("Attempt to close connection manager which is already closed");
            return;
        }

        tracing::info!(address = %self.inner.config.address(), "Closing connection manager");
        let connection = slot.connection.take();
        if let Some(connection) = &connection {
            if let Err(e) = connection.close().await {
                if connection.is_open() {
                    tracing::error!(error = %e, "Unable to close current connection");
                } else {
                    tracing::warn!("Attempt to close an already closed connection");
                }
            }
        }

        self.inner
            .transition(&mut slot, ConnectionState::Closed, &Transition::Closed(connection.as_ref()));
        tracing::info!("Closed connection manager");
    }

    /// Current state. A snapshot; it may change right after the call.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Configuration this manager connects with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Register a listener for established / lost / closed transitions.
    pub fn register_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let id = ListenerId::new(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        tracing::debug!(listener = %id, "Registered connection listener");
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        before != listeners.len()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.inner.config.address())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Open a new connection. Must be called with the operation lock held.
    async fn establish(
        self: &Arc<Self>,
        slot: &mut Slot,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if slot.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        // connect() and the reconnect loop only get here from NeverConnected or
        // Connecting. A Connected slot is still handled: the old handle is closed.
        if slot.state == ConnectionState::Connected {
            tracing::warn!("Establishing new connection although a connection is already established");
        }

        let address = self.config.address();
        let runtime = Handle::try_current().map_err(|e| ConnectionError::Establish {
            address: address.clone(),
            source: BrokerError::Other(format!("no tokio runtime to watch the connection: {e}")),
        })?;

        tracing::info!(address = %address, "Trying to establish connection");
        let opened = tokio::time::timeout(
            self.config.connect_timeout,
            self.factory.open_connection(&self.config),
        )
        .await
        .unwrap_or(Err(BrokerError::Timeout(self.config.connect_timeout)));

        let connection = opened.map_err(|source| {
            tracing::warn!(address = %address, error = %source, "Failed to establish connection");
            ConnectionError::Establish {
                address: address.clone(),
                source,
            }
        })?;

        slot.generation += 1;
        let generation = slot.generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        connection.on_shutdown(Box::new(move |signal| {
            if let Some(inner) = weak.upgrade() {
                runtime.spawn(inner.handle_shutdown(generation, signal));
            }
        }));

        if let Some(previous) = slot.connection.replace(Arc::clone(&connection)) {
            if let Err(e) = previous.close().await {
                tracing::debug!(error = %e, "Replaced connection did not close cleanly");
            }
        }

        tracing::info!(address = %address, generation, "Established connection");
        counter!(CONNECTIONS_ESTABLISHED).increment(1);
        self.transition(slot, ConnectionState::Connected, &Transition::Established(&connection));
        Ok(connection)
    }

    /// React to a shutdown signal from the connection of `generation`.
    ///
    /// Boxed so the shutdown hook registered in `establish` can spawn it.
    fn handle_shutdown(
        self: Arc<Self>,
        generation: u64,
        signal: ShutdownSignal,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !signal.is_hard() {
                tracing::debug!(reason = %signal.reason, "Ignoring soft shutdown signal");
                return;
            }

            {
                let mut slot = self.slot.lock().await;
                if slot.generation != generation {
                    tracing::debug!(generation, "Ignoring shutdown signal from a replaced connection");
                    return;
                }
                if matches!(slot.state, ConnectionState::Closed | ConnectionState::Connecting) {
                    return;
                }
                let lost = slot.connection.take();
                self.transition(&mut slot, ConnectionState::Connecting, &Transition::Lost(lost.as_ref()));
            }

            counter!(CONNECTIONS_LOST).increment(1);
            tracing::error!(
                address = %self.config.address(),
                reason = %signal.reason,
                "Connection lost"
            );
            self.reconnect().await;
        })
    }

    /// Retry establishment until connected or closed. Never holds the lock while waiting.
    async fn reconnect(self: &Arc<Self>) {
        let outcome = retry_at_interval(
            "reconnect",
            self.config.reconnect_interval,
            || async move {
                let mut slot = self.slot.lock().await;
                let state = slot.state;
                match state {
                    ConnectionState::Connecting => {
                        counter!(RECONNECT_ATTEMPTS).increment(1);
                        self.establish(&mut slot).await.map(|_| ())
                    }
                    ConnectionState::Closed => Err(ConnectionError::Closed),
                    // Someone else got there first.
                    ConnectionState::Connected | ConnectionState::NeverConnected => Ok(()),
                }
            },
            ConnectionError::is_retryable,
            || self.closed(),
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded(()) => tracing::info!("Reconnected"),
            RetryOutcome::Failed(_) | RetryOutcome::Cancelled => {
                tracing::info!("Connection manager closed, reconnect loop stopped");
            }
        }
    }

    /// Resolves once the manager is closed.
    async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Apply a state change and notify listeners. Must be called with the lock held.
    fn transition(&self, slot: &mut Slot, state: ConnectionState, event: &Transition<'_>) {
        slot.state = state;
        self.state.send_replace(state);
        tracing::debug!(state = %state, "Notifying connection listeners about state change");

        // Snapshot so a listener may (un)register without deadlocking.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            let notified = catch_unwind(AssertUnwindSafe(|| match event {
                Transition::Established(connection) => listener.on_established(connection),
                Transition::Lost(connection) => listener.on_lost(*connection),
                Transition::Closed(connection) => listener.on_closed(*connection),
            }));
            if notified.is_err() {
                tracing::error!(listener = %id, state = %state, "Connection listener panicked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use resilient_rabbit_testing::InMemoryBroker;

    #[test]
    fn manager_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ConnectionManager>();
        assert_sync::<ConnectionManager>();
    }

    #[tokio::test]
    async fn establishing_while_connected_replaces_the_connection() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig::default());
        let first = manager.connect().await.unwrap();

        let second = {
            let mut slot = manager.inner.slot.lock().await;
            manager.inner.establish(&mut slot).await.unwrap()
        };

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(broker.open_connection_count(), 1);
        assert_eq!(broker.connection_attempts(), 2);
    }
}
