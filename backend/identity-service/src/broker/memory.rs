/// In-process broker used when no broker is configured and in tests
///
/// Follows AMQP semantics closely enough to exercise the publisher: exchanges
/// and queues must be declared before use, redeclaring with a different shape
/// is a channel error, and direct exchanges route by exact binding key.
///
/// Nothing consumes the queues, so each keeps at most `queue_capacity`
/// messages and drops the oldest beyond that.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    Binding, BrokerChannel, BrokerConnection, BrokerConnector, ExchangeKind, ExchangeSpec,
    OutgoingMessage, QueueSpec,
};
use crate::error::BrokerError;

/// Messages kept per queue by [`InMemoryBroker::new`]
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, (QueueSpec, VecDeque<OutgoingMessage>)>,
    bindings: HashSet<Binding>,
    queue_capacity: usize,
    unroutable: u64,
    dropped: u64,
    /// Open flags of live connections; closed ones are pruned on connect
    connections: Vec<Arc<AtomicBool>>,
}

impl BrokerState {
    fn new(queue_capacity: usize) -> Self {
        Self {
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            bindings: HashSet::new(),
            queue_capacity: queue_capacity.max(1),
            unroutable: 0,
            dropped: 0,
            connections: Vec::new(),
        }
    }
}

/// Declared topology, sorted for comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub exchanges: Vec<(String, ExchangeKind, bool)>,
    pub queues: Vec<(String, bool, usize)>,
    pub bindings: Vec<(String, String, String)>,
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    connects: Arc<AtomicU64>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(queue_capacity))),
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Messages currently queued on `queue`
    pub async fn messages(&self, queue: &str) -> Vec<OutgoingMessage> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|(_, messages)| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages accepted by an exchange with no matching binding
    pub async fn unroutable_count(&self) -> u64 {
        self.state.lock().await.unroutable
    }

    /// Messages evicted from full queues
    pub async fn dropped_count(&self) -> u64 {
        self.state.lock().await.dropped
    }

    pub async fn snapshot(&self) -> TopologySnapshot {
        let state = self.state.lock().await;

        let mut exchanges: Vec<_> = state
            .exchanges
            .values()
            .map(|e| (e.name.clone(), e.kind, e.durable))
            .collect();
        exchanges.sort_by(|a, b| a.0.cmp(&b.0));

        let mut queues: Vec<_> = state
            .queues
            .values()
            .map(|(q, messages)| (q.name.clone(), q.durable, messages.len()))
            .collect();
        queues.sort_by(|a, b| a.0.cmp(&b.0));

        let mut bindings: Vec<_> = state
            .bindings
            .iter()
            .map(|b| (b.exchange.clone(), b.queue.clone(), b.routing_key.clone()))
            .collect();
        bindings.sort();

        TopologySnapshot {
            exchanges,
            queues,
            bindings,
        }
    }

    /// Drop every open connection, as a broker restart would
    pub async fn sever_connections(&self) {
        let mut state = self.state.lock().await;
        for open in state.connections.drain(..) {
            open.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        let open = Arc::new(AtomicBool::new(true));
        {
            let mut state = self.state.lock().await;
            state
                .connections
                .retain(|connection| connection.load(Ordering::SeqCst));
            state.connections.push(Arc::clone(&open));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryConnection {
            state: Arc::clone(&self.state),
            open,
        })
    }
}

#[derive(Clone)]
pub struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    type Channel = InMemoryChannel;

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed(
                "connection was closed by the broker".to_string(),
            ));
        }
        Ok(InMemoryChannel {
            connection: self.clone(),
            open: true,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct InMemoryChannel {
    connection: InMemoryConnection,
    open: bool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if !self.connection.is_open() {
            return Err(BrokerError::ConnectionClosed(
                "connection was closed by the broker".to_string(),
            ));
        }
        if !self.open {
            return Err(BrokerError::ChannelClosed("channel is closed".to_string()));
        }
        Ok(())
    }

    /// Channel-level errors close the channel, as in AMQP
    fn channel_error(&mut self, reason: String) -> BrokerError {
        self.open = false;
        BrokerError::Other(reason)
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let state = Arc::clone(&self.connection.state);
        let mut state = state.lock().await;

        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing == exchange => Ok(()),
            Some(existing) => Err(self.channel_error(format!(
                "PRECONDITION_FAILED - inequivalent arg for exchange '{}': declared {} (durable={}), requested {} (durable={})",
                exchange.name, existing.kind, existing.durable, exchange.kind, exchange.durable
            ))),
            None => {
                state
                    .exchanges
                    .insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let state = Arc::clone(&self.connection.state);
        let mut state = state.lock().await;

        match state.queues.get(&queue.name) {
            Some((existing, _)) if existing == queue => Ok(()),
            Some(_) => Err(self.channel_error(format!(
                "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                queue.name
            ))),
            None => {
                state
                    .queues
                    .insert(queue.name.clone(), (queue.clone(), VecDeque::new()));
                Ok(())
            }
        }
    }

    async fn bind_queue(&mut self, binding: &Binding) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let state = Arc::clone(&self.connection.state);
        let mut state = state.lock().await;

        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(self.channel_error(format!(
                "NOT_FOUND - no exchange '{}'",
                binding.exchange
            )));
        }
        if !state.queues.contains_key(&binding.queue) {
            return Err(self.channel_error(format!("NOT_FOUND - no queue '{}'", binding.queue)));
        }

        state.bindings.insert(binding.clone());
        Ok(())
    }

    async fn publish(&mut self, message: OutgoingMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let state = Arc::clone(&self.connection.state);
        let mut state = state.lock().await;

        let Some(exchange) = state.exchanges.get(&message.exchange) else {
            return Err(self.channel_error(format!(
                "NOT_FOUND - no exchange '{}'",
                message.exchange
            )));
        };
        let kind = exchange.kind;

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == message.exchange)
            .filter(|b| kind == ExchangeKind::Fanout || b.routing_key == message.routing_key)
            .map(|b| b.queue.clone())
            .collect();

        if targets.is_empty() {
            state.unroutable += 1;
            return Ok(());
        }

        let capacity = state.queue_capacity;
        let mut dropped = 0;
        for queue in targets {
            if let Some((_, messages)) = state.queues.get_mut(&queue) {
                if messages.len() >= capacity {
                    messages.pop_front();
                    dropped += 1;
                }
                messages.push_back(message.clone());
            }
        }
        state.dropped += dropped;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.open = false;
        Ok(())
    }
}
