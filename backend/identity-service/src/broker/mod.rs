//! Message broker seam for integration events
//!
//! The publisher talks to a broker through three layers:
//!
//! - [`BrokerConnector`] establishes a [`BrokerConnection`] (TCP, SASL, TLS).
//! - A connection is long-lived, cheap to clone and reports whether it is
//!   still usable through [`BrokerConnection::is_open`].
//! - A [`BrokerChannel`] is opened per publish, declares the topology and
//!   carries the message, then is closed.
//!
//! Topology declarations are idempotent: declaring an existing exchange or
//! queue with the same shape, or re-binding an existing binding, is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::topology;
use std::fmt;
use uuid::Uuid;

use crate::error::BrokerError;

pub mod kafka;
pub mod memory;

pub use kafka::KafkaConnector;
pub use memory::InMemoryBroker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Route to queues whose binding key equals the routing key
    Direct,
    /// Route to every bound queue
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// Exchange, queue and binding an event type is delivered through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub binding: Binding,
}

impl Topology {
    /// `identity-events` (durable, direct) -> `account-registered` on
    /// `account.registered`
    pub fn account_registered() -> Self {
        Self {
            exchange: ExchangeSpec {
                name: topology::EXCHANGE.to_string(),
                kind: ExchangeKind::Direct,
                durable: true,
            },
            queue: QueueSpec {
                name: topology::ACCOUNT_REGISTERED_QUEUE.to_string(),
                durable: true,
            },
            binding: Binding {
                exchange: topology::EXCHANGE.to_string(),
                queue: topology::ACCOUNT_REGISTERED_QUEUE.to_string(),
                routing_key: topology::ACCOUNT_REGISTERED_ROUTING_KEY.to_string(),
            },
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.binding.routing_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    /// Survives a broker restart
    Persistent,
}

/// A serialized message ready for a channel
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub message_id: Uuid,
    pub exchange: String,
    pub routing_key: String,
    pub event_type: String,
    pub content_type: String,
    pub delivery_mode: DeliveryMode,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Connection: BrokerConnection;

    /// Establish a new authenticated connection
    async fn connect(&self) -> Result<Self::Connection, BrokerError>;
}

#[async_trait]
pub trait BrokerConnection: Clone + Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Close the connection; further channels fail with `ConnectionClosed`
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerChannel: Send {
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<(), BrokerError>;

    async fn bind_queue(&mut self, binding: &Binding) -> Result<(), BrokerError>;

    async fn publish(&mut self, message: OutgoingMessage) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Declare the exchange and queue, then bind them. Safe to repeat.
pub async fn ensure_topology<C>(channel: &mut C, topology: &Topology) -> Result<(), BrokerError>
where
    C: BrokerChannel + ?Sized,
{
    channel.declare_exchange(&topology.exchange).await?;
    channel.declare_queue(&topology.queue).await?;
    channel.bind_queue(&topology.binding).await?;
    Ok(())
}
