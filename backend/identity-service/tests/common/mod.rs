#![allow(dead_code)]

use async_trait::async_trait;
use identity_service::broker::memory::{InMemoryChannel, InMemoryConnection};
use identity_service::broker::{
    Binding, BrokerChannel, BrokerConnection, BrokerConnector, ExchangeSpec, InMemoryBroker,
    OutgoingMessage, QueueSpec,
};
use identity_service::config::JwtSettings;
use identity_service::error::BrokerError;
use identity_service::models::RegistrationRequest;
use identity_service::security::TokenIssuer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn token_issuer() -> TokenIssuer {
    TokenIssuer::from_settings(&JwtSettings {
        signing_key: TEST_SECRET.to_string(),
        validation_key: None,
        algorithm: "HS256".to_string(),
        issuer: "identity-service".to_string(),
        audience: "marketplace-api".to_string(),
        expiry_seconds: 604_800,
    })
    .unwrap()
}

pub fn request(email: &str, role: &str) -> RegistrationRequest {
    RegistrationRequest {
        email: email.to_string(),
        password: "SecurePass123!".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        role: role.to_string(),
        tenant_id: None,
    }
}

pub fn request_with_tenant(email: &str, role: &str, tenant_id: Uuid) -> RegistrationRequest {
    RegistrationRequest {
        tenant_id: Some(tenant_id),
        ..request(email, role)
    }
}

#[derive(Default)]
struct Script {
    connect_failures: Mutex<VecDeque<BrokerError>>,
    publish_failures: Mutex<VecDeque<BrokerError>>,
    publish_delays: Mutex<VecDeque<Duration>>,
    bind_failures: Mutex<VecDeque<BrokerError>>,
    connect_calls: AtomicU32,
    publish_calls: AtomicU32,
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap().pop_front()
}

/// In-memory broker that fails on cue
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    broker: InMemoryBroker,
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn fail_connect(self, error: BrokerError) -> Self {
        self.script.connect_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn fail_publish(self, error: BrokerError) -> Self {
        self.script.publish_failures.lock().unwrap().push_back(error);
        self
    }

    /// Delay the next publish by `delay` before it proceeds
    pub fn stall_publish(self, delay: Duration) -> Self {
        self.script.publish_delays.lock().unwrap().push_back(delay);
        self
    }

    /// Declarations succeed, then binding reports a recovery failure
    pub fn fail_bind(self, error: BrokerError) -> Self {
        self.script.bind_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.script.connect_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> u32 {
        self.script.publish_calls.load(Ordering::SeqCst)
    }

    pub async fn delivered(&self) -> usize {
        self.broker.messages("account-registered").await.len()
    }
}

#[async_trait]
impl BrokerConnector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        self.script.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = pop(&self.script.connect_failures) {
            return Err(error);
        }

        Ok(ScriptedConnection {
            inner: self.broker.connect().await?,
            script: Arc::clone(&self.script),
        })
    }
}

#[derive(Clone)]
pub struct ScriptedConnection {
    inner: InMemoryConnection,
    script: Arc<Script>,
}

#[async_trait]
impl BrokerConnection for ScriptedConnection {
    type Channel = ScriptedChannel;

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        Ok(ScriptedChannel {
            inner: self.inner.open_channel().await?,
            script: Arc::clone(&self.script),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

pub struct ScriptedChannel {
    inner: InMemoryChannel,
    script: Arc<Script>,
}

#[async_trait]
impl BrokerChannel for ScriptedChannel {
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.inner.declare_exchange(exchange).await
    }

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<(), BrokerError> {
        self.inner.declare_queue(queue).await
    }

    async fn bind_queue(&mut self, binding: &Binding) -> Result<(), BrokerError> {
        self.inner.bind_queue(binding).await?;
        match pop(&self.script.bind_failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn publish(&mut self, message: OutgoingMessage) -> Result<(), BrokerError> {
        self.script.publish_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = pop(&self.script.publish_delays) {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = pop(&self.script.publish_failures) {
            return Err(error);
        }
        self.inner.publish(message).await
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}
