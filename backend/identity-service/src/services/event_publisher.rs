/// Integration event publisher
///
/// Publishes `AccountRegistered` through a [`BrokerConnector`]. Each publish
/// acquires the cached connection (reconnecting when it is no longer open),
/// opens a channel, ensures the topology, publishes and closes the channel.
/// The whole attempt runs under the publish timeout and is retried with the
/// configured backoff while the failure is transient.
use async_trait::async_trait;
use chrono::Utc;
use event_schema::{topology, AccountRegisteredEvent};
use resilience::{with_retry_if, with_timeout_or, RetryConfig, RetryError};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{
    ensure_topology, BrokerChannel, BrokerConnection, BrokerConnector, DeliveryMode,
    KafkaConnector, OutgoingMessage, Topology,
};
use crate::config::BrokerSettings;
use crate::error::{BrokerError, PublishError};
use crate::metrics;

/// Whether the broker is known to have routed the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Confirmed,
    /// Published, but the topology could not be verified
    Unconfirmed,
}

impl DeliveryStatus {
    /// Label used for the publish outcome metric
    pub fn outcome(&self) -> &'static str {
        match self {
            DeliveryStatus::Confirmed => "published",
            DeliveryStatus::Unconfirmed => "unconfirmed",
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_account_registered(
        &self,
        event: &AccountRegisteredEvent,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStatus, PublishError>;

    /// Release broker resources; later publishes reconnect
    async fn shutdown(&self) {}
}

/// The cached connection and the generation it was opened in
struct ConnectionSlot<T> {
    current: Option<T>,
    generation: u64,
}

pub struct IntegrationEventPublisher<C: BrokerConnector> {
    connector: C,
    connection: Mutex<ConnectionSlot<C::Connection>>,
    topology: Topology,
    retry: RetryConfig,
    publish_timeout: Duration,
}

impl IntegrationEventPublisher<KafkaConnector> {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(
            KafkaConnector::new(settings.clone()),
            settings.retry_config(),
            settings.publish_timeout(),
        )
    }
}

impl<C: BrokerConnector> IntegrationEventPublisher<C> {
    pub fn new(connector: C, retry: RetryConfig, publish_timeout: Duration) -> Self {
        Self {
            connector,
            connection: Mutex::new(ConnectionSlot {
                current: None,
                generation: 0,
            }),
            topology: Topology::account_registered(),
            retry,
            publish_timeout,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Close the cached connection, if any
    pub async fn close_connection(&self) {
        if let Some(connection) = self.connection.lock().await.current.take() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close broker connection");
            }
        }
    }

    /// Reuse the cached connection while it is open, otherwise connect.
    ///
    /// The lock is held across `connect` so concurrent publishers never open
    /// more than one connection. Returns the connection with its generation.
    async fn acquire_connection(&self) -> Result<(u64, C::Connection), BrokerError> {
        let mut slot = self.connection.lock().await;

        if let Some(connection) = slot.current.as_ref() {
            if connection.is_open() {
                return Ok((slot.generation, connection.clone()));
            }
            debug!("Cached broker connection is closed, reconnecting");
        }

        slot.current = None;
        let connection = self.connector.connect().await?;
        slot.generation += 1;
        slot.current = Some(connection.clone());
        Ok((slot.generation, connection))
    }

    /// Drop the cached connection if it is still the one from `generation`.
    /// A failure on an older connection leaves its replacement alone.
    async fn invalidate_connection(&self, generation: u64) {
        let mut slot = self.connection.lock().await;
        if slot.generation != generation {
            return;
        }
        if let Some(connection) = slot.current.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, generation, "Failed to close broker connection");
            }
        }
    }

    /// One publish attempt. `generation` is set once a connection is acquired
    /// so the caller can still invalidate it after a timeout.
    async fn attempt(
        &self,
        message: &OutgoingMessage,
        generation: &AtomicU64,
    ) -> Result<DeliveryStatus, BrokerError> {
        let (acquired, connection) = self.acquire_connection().await?;
        generation.store(acquired, Ordering::SeqCst);
        let mut channel = connection.open_channel().await?;

        let result = self.publish_on(&mut channel, message.clone()).await;

        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close broker channel");
        }
        result
    }

    async fn publish_on(
        &self,
        channel: &mut <C::Connection as BrokerConnection>::Channel,
        message: OutgoingMessage,
    ) -> Result<DeliveryStatus, BrokerError> {
        let mut status = DeliveryStatus::Confirmed;

        match ensure_topology(channel, &self.topology).await {
            Ok(()) => {}
            Err(BrokerError::TopologyRecovery(reason)) => {
                warn!(
                    exchange = %self.topology.exchange.name,
                    reason = %reason,
                    "Topology recovery failed, publishing anyway"
                );
                status = DeliveryStatus::Unconfirmed;
            }
            Err(e) => return Err(e),
        }

        match channel.publish(message).await {
            Ok(()) => Ok(status),
            Err(BrokerError::TopologyRecovery(reason)) => {
                warn!(reason = %reason, "Topology recovery failed during publish");
                Ok(DeliveryStatus::Unconfirmed)
            }
            Err(e) => Err(e),
        }
    }

    fn outgoing_message(
        &self,
        event: &AccountRegisteredEvent,
    ) -> Result<OutgoingMessage, serde_json::Error> {
        Ok(OutgoingMessage {
            message_id: Uuid::new_v4(),
            exchange: self.topology.exchange.name.clone(),
            routing_key: self.topology.routing_key().to_string(),
            event_type: event.event_type().to_string(),
            content_type: topology::CONTENT_TYPE.to_string(),
            delivery_mode: DeliveryMode::Persistent,
            timestamp: Utc::now(),
            payload: event.to_json_bytes()?,
        })
    }

    async fn publish(
        &self,
        event: &AccountRegisteredEvent,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStatus, PublishError> {
        let message = self.outgoing_message(event)?;
        let attempts = AtomicU32::new(0);

        let this = self;
        let message = &message;
        let attempts_ref = &attempts;

        let outcome = with_retry_if(
            self.retry.clone(),
            cancel,
            |e: &BrokerError| e.is_transient(),
            move || async move {
                attempts_ref.fetch_add(1, Ordering::SeqCst);
                let generation = AtomicU64::new(0);

                let result = with_timeout_or(
                    this.publish_timeout,
                    this.attempt(message, &generation),
                    |after| {
                        BrokerError::PublishFailed(format!("attempt timed out after {:?}", after))
                    },
                )
                .await;

                if let Err(e) = &result {
                    let generation = generation.load(Ordering::SeqCst);
                    // 0: failed before a connection was acquired
                    if e.invalidates_connection() && generation != 0 {
                        this.invalidate_connection(generation).await;
                    }
                }
                result
            },
        )
        .await;

        match outcome {
            Ok(status) => {
                info!(
                    account_id = %event.account_id,
                    message_id = %message.message_id,
                    routing_key = %message.routing_key,
                    attempts = attempts.load(Ordering::SeqCst),
                    status = status.outcome(),
                    "Published AccountRegistered event"
                );
                Ok(status)
            }
            Err(RetryError::NonRetryable { attempt, error }) if error.is_fatal() => {
                error!(
                    fatal = true,
                    account_id = %event.account_id,
                    attempt,
                    error = %error,
                    "Broker rejected the connection; not retrying"
                );
                Err(PublishError::Fatal(error))
            }
            Err(RetryError::NonRetryable { attempt, error }) => {
                error!(
                    account_id = %event.account_id,
                    attempt,
                    error = %error,
                    "Unexpected broker failure"
                );
                Err(PublishError::Unexpected(error))
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                error!(
                    account_id = %event.account_id,
                    attempts,
                    error = %last_error,
                    "Giving up on AccountRegistered event"
                );
                Err(PublishError::RetriesExhausted {
                    attempts,
                    source: last_error,
                })
            }
            Err(RetryError::Cancelled { attempts }) => {
                warn!(
                    account_id = %event.account_id,
                    attempts,
                    "AccountRegistered publish cancelled"
                );
                Err(PublishError::Cancelled { attempts })
            }
        }
    }
}

#[async_trait]
impl<C> EventPublisher for IntegrationEventPublisher<C>
where
    C: BrokerConnector,
{
    async fn publish_account_registered(
        &self,
        event: &AccountRegisteredEvent,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStatus, PublishError> {
        let result = self.publish(event, cancel).await;

        match &result {
            Ok(status) => metrics::record_event_publish(status.outcome()),
            Err(e) => metrics::record_event_publish(e.outcome()),
        }
        result
    }

    async fn shutdown(&self) {
        self.close_connection().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use std::sync::Arc;

    fn publisher(broker: &InMemoryBroker) -> IntegrationEventPublisher<InMemoryBroker> {
        IntegrationEventPublisher::new(
            broker.clone(),
            RetryConfig {
                jitter: false,
                ..RetryConfig::default()
            },
            Duration::from_secs(10),
        )
    }

    fn event() -> AccountRegisteredEvent {
        AccountRegisteredEvent::new(Uuid::new_v4(), "a@x.com".to_string(), "Customer", None)
    }

    #[tokio::test]
    async fn test_publish_routes_persistent_json() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);
        let event = event();

        let status = publisher
            .publish_account_registered(&event, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Confirmed);

        let messages = broker.messages("account-registered").await;
        assert_eq!(messages.len(), 1);

        let message = &messages[0];
        assert_eq!(message.routing_key, "account.registered");
        assert_eq!(message.content_type, "application/json");
        assert_eq!(message.delivery_mode, DeliveryMode::Persistent);

        let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body["accountId"], event.account_id.to_string());
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["role"], "Customer");
        assert!(body["tenantId"].is_null());
        assert!(body["registeredAt"].is_string());
    }

    #[tokio::test]
    async fn test_connection_is_reused_until_closed() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);
        let cancel = CancellationToken::new();

        publisher.publish_account_registered(&event(), &cancel).await.unwrap();
        publisher.publish_account_registered(&event(), &cancel).await.unwrap();
        assert_eq!(broker.connect_count(), 1);

        broker.sever_connections().await;
        publisher.publish_account_registered(&event(), &cancel).await.unwrap();
        assert_eq!(broker.connect_count(), 2);
        assert_eq!(broker.messages("account-registered").await.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_share_one_connection() {
        let broker = InMemoryBroker::new();
        let publisher = Arc::new(publisher(&broker));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move {
                    publisher
                        .publish_account_registered(&event(), &CancellationToken::new())
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(broker.connect_count(), 1);
        assert_eq!(broker.messages("account-registered").await.len(), 16);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher
            .publish_account_registered(&event(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Cancelled { attempts: 0 }));
        assert_eq!(err.outcome(), "cancelled");
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_cached_connection() {
        let broker = InMemoryBroker::new();
        let publisher = publisher(&broker);
        let cancel = CancellationToken::new();

        publisher.publish_account_registered(&event(), &cancel).await.unwrap();
        publisher.shutdown().await;
        publisher.publish_account_registered(&event(), &cancel).await.unwrap();

        assert_eq!(broker.connect_count(), 2);
    }
}
