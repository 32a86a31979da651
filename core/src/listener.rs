//! Connection state and the listener contract.

use crate::broker::Connection;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of the connection manager.
///
/// Transitions are monotonic except for `Connecting ↔ Connected` cycling.
/// Once `Closed`, the manager never leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has ever been established
    NeverConnected,
    /// A connection was lost and is being re-established
    Connecting,
    /// A live connection can be retrieved
    Connected,
    /// Closed for good; no connection can be retrieved
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverConnected => write!(f, "never-connected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Handle returned when registering a [`ConnectionListener`], used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Observer of connection manager transitions.
///
/// Callbacks run synchronously while the manager holds its connection lock, in
/// transition order. They must return quickly and must not call back into the
/// manager; hand real work to a task. A panicking listener is logged and skipped.
pub trait ConnectionListener: Send + Sync {
    /// A connection was established (first time or after a loss).
    fn on_established(&self, connection: &Arc<dyn Connection>);

    /// The connection was lost; the manager is reconnecting.
    fn on_lost(&self, connection: Option<&Arc<dyn Connection>>);

    /// The manager was closed; no further connections will be established.
    fn on_closed(&self, connection: Option<&Arc<dyn Connection>>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::NeverConnected.to_string(), "never-connected");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
