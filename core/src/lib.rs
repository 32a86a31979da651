//! # Resilient Rabbit Core
//!
//! Core traits and types for a client-side resilience layer on top of an AMQP
//! broker client.
//!
//! This crate contains no I/O. It defines:
//!
//! - **Broker collaborators** ([`broker`]): the narrow connection, channel and
//!   delivery interfaces the runtime consumes. Production code plugs in the
//!   `lapin` adapter, tests plug in the in-memory broker.
//! - **Messages** ([`message`]): deliveries handed to consumers and messages
//!   handed to channels for publishing.
//! - **Consumers** ([`consumer`]): the immutable [`ConsumerDescriptor`] and the
//!   [`MessageCallback`] contract user code implements.
//! - **Connection listeners** ([`listener`]): the observer contract the
//!   connection manager notifies on established / lost / closed transitions.
//! - **Configuration** ([`config`]) and the **error taxonomy** ([`error`]).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐      listener events      ┌─────────────────────┐
//! │  ConnectionManager   │ ────────────────────────▶ │  ConsumerContainer  │
//! │  (one connection)    │ ◀──────────────────────── │  (holders)          │
//! └──────────┬───────────┘        connect()          └──────────┬──────────┘
//!            │                                                  │
//!            ▼                                                  ▼
//! ┌──────────────────────┐                           ┌─────────────────────┐
//! │  ConnectionFactory   │                           │  Channel (per       │
//! │  (broker client)     │                           │  active holder)     │
//! └──────────────────────┘                           └─────────────────────┘
//! ```
//!
//! The runtime pieces live in `resilient-rabbit-runtime`.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod listener;
pub mod message;

pub use broker::{
    BoxFuture, Channel, Connection, ConnectionFactory, DeliveryHandler, ShutdownKind,
    ShutdownListener, ShutdownSignal,
};
pub use config::{ConnectionConfig, ContainerConfig, Credentials};
pub use consumer::{
    ConsumerDescriptor, DEFAULT_PREFETCH_COUNT, FnCallback, MessageCallback, callback_fn,
};
pub use error::{BrokerError, ConfigError, ConnectionError, ConsumerError};
pub use listener::{ConnectionListener, ConnectionState, ListenerId};
pub use message::{Delivery, Message, RoutingInfo};
