/// Kafka transport for integration events
///
/// Exchanges and queues are materialized as topics. Topic creation goes
/// through the admin client and tolerates `TopicAlreadyExists`, so declaring
/// repeatedly is harmless. Kafka has no server-side bindings; the connector
/// keeps a binding table and a publish to an exchange is written to every
/// bound queue topic whose key matches (direct) or to all of them (fanout).
/// With no matching binding the record lands on the exchange topic itself.
///
/// The producer is idempotent with `acks=all`, which is the Kafka analogue of
/// a persistent, confirmed publish.
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    Binding, BrokerChannel, BrokerConnection, BrokerConnector, DeliveryMode, ExchangeKind,
    ExchangeSpec, OutgoingMessage, QueueSpec,
};
use crate::config::BrokerSettings;
use crate::error::BrokerError;

const CLIENT_ID: &str = "identity-service";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
/// Retention for topics declared non-durable
const TRANSIENT_RETENTION_MS: &str = "3600000";

#[derive(Default)]
struct RoutingTable {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<Binding>,
}

impl RoutingTable {
    fn targets(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        let kind = self.exchanges.get(exchange).copied();
        self.bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| kind == Some(ExchangeKind::Fanout) || b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect()
    }
}

pub struct KafkaConnector {
    settings: BrokerSettings,
    routing: Arc<RwLock<RoutingTable>>,
}

impl KafkaConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        if let Some(tls) = &settings.tls {
            match tls.server_name.as_deref() {
                Some(name) if name != settings.host => warn!(
                    host = %settings.host,
                    server_name = %name,
                    "Broker TLS server name differs from host; certificate is verified against the host"
                ),
                _ => {}
            }
            if tls.min_version.requires_system_policy() {
                warn!(
                    min_version = %tls.min_version,
                    "librdkafka cannot set a TLS floor; enforcement relies on the system OpenSSL MinProtocol policy"
                );
            }
        }

        Self {
            settings,
            routing: Arc::new(RwLock::new(RoutingTable::default())),
        }
    }

    /// librdkafka configuration shared by the producer and admin client
    pub fn client_config(&self) -> ClientConfig {
        let settings = &self.settings;
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", settings.address())
            .set("client.id", CLIENT_ID)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set(
                "message.timeout.ms",
                settings.publish_timeout().as_millis().to_string(),
            )
            .set("sasl.mechanism", &settings.sasl_mechanism)
            .set("sasl.username", &settings.username)
            .set("sasl.password", &settings.password);

        match &settings.tls {
            Some(tls) => {
                config
                    .set("security.protocol", "SASL_SSL")
                    .set("ssl.endpoint.identification.algorithm", "https");
                if let Some(ca_location) = &tls.ca_location {
                    config.set("ssl.ca.location", ca_location);
                }
            }
            None => {
                config.set("security.protocol", "SASL_PLAINTEXT");
            }
        }

        config
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    type Connection = KafkaConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        let config = self.client_config();

        let producer: FutureProducer = config.create().map_err(|e| classify_kafka_error(&e))?;
        let admin: AdminClient<DefaultClientContext> =
            config.create().map_err(|e| classify_kafka_error(&e))?;

        // Metadata round-trip surfaces unreachable brokers and rejected
        // credentials before the connection is cached
        let probe = producer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::Interrupted(format!("Metadata probe aborted: {}", e)))?
        .map_err(|e| classify_kafka_error(&e))?;

        info!(
            address = %self.settings.address(),
            tls = self.settings.tls.is_some(),
            tls_min_version = ?self.settings.tls.as_ref().map(|t| t.min_version),
            "Connected to Kafka"
        );

        Ok(KafkaConnection {
            inner: Arc::new(ConnectionInner {
                producer,
                admin,
                routing: Arc::clone(&self.routing),
                open: AtomicBool::new(true),
                operation_timeout: self.settings.publish_timeout(),
            }),
        })
    }
}

struct ConnectionInner {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    routing: Arc<RwLock<RoutingTable>>,
    open: AtomicBool,
    operation_timeout: Duration,
}

impl ConnectionInner {
    /// Classify and mark the connection dead when the error demands it
    fn fail(&self, err: &KafkaError) -> BrokerError {
        let classified = classify_kafka_error(err);
        if classified.invalidates_connection() {
            self.open.store(false, Ordering::SeqCst);
        }
        classified
    }

    async fn create_topic(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        let mut topic = NewTopic::new(name, -1, TopicReplication::Fixed(-1));
        if !durable {
            topic = topic.set("retention.ms", TRANSIENT_RETENTION_MS);
        }

        let options = AdminOptions::new().operation_timeout(Some(self.operation_timeout));
        let results = self
            .admin
            .create_topics([&topic], &options)
            .await
            .map_err(|e| self.fail(&e))?;

        for result in results {
            match result {
                Ok(created) => debug!(topic = %created, "Topic created"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    let classified = classify_error_code(code, format!("{}: {}", topic, code));
                    return Err(match classified {
                        fatal if fatal.is_fatal() => fatal,
                        transient if transient.is_transient() => transient,
                        other => BrokerError::TopologyRecovery(other.to_string()),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct KafkaConnection {
    inner: Arc<ConnectionInner>,
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
    type Channel = KafkaChannel;

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed(
                "Kafka client has been shut down".to_string(),
            ));
        }
        Ok(KafkaChannel {
            inner: Arc::clone(&self.inner),
            open: true,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let producer = self.inner.producer.clone();
        let timeout = self.inner.operation_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Interrupted(format!("Flush aborted: {}", e)))?
            .map_err(|e| classify_kafka_error(&e))
    }
}

/// Per-publish session over a shared producer
pub struct KafkaChannel {
    inner: Arc<ConnectionInner>,
    open: bool,
}

impl KafkaChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed(
                "Kafka client has been shut down".to_string(),
            ));
        }
        if !self.open {
            return Err(BrokerError::ChannelClosed("channel is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for KafkaChannel {
    async fn declare_exchange(&mut self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;

        {
            let mut routing = self.inner.routing.write().await;
            match routing.exchanges.get(&exchange.name) {
                Some(kind) if *kind != exchange.kind => {
                    return Err(BrokerError::TopologyRecovery(format!(
                        "exchange '{}' already declared as {}",
                        exchange.name, kind
                    )));
                }
                Some(_) => {}
                None => {
                    routing.exchanges.insert(exchange.name.clone(), exchange.kind);
                }
            }
        }

        self.inner
            .create_topic(&exchange.name, exchange.durable)
            .await
    }

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.inner.create_topic(&queue.name, queue.durable).await
    }

    async fn bind_queue(&mut self, binding: &Binding) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let mut routing = self.inner.routing.write().await;
        if !routing.bindings.contains(binding) {
            routing.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(&mut self, message: OutgoingMessage) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let mut topics = self
            .inner
            .routing
            .read()
            .await
            .targets(&message.exchange, &message.routing_key);
        if topics.is_empty() {
            topics.push(message.exchange.clone());
        }

        let message_id = message.message_id.to_string();
        let timestamp = message.timestamp.to_rfc3339();
        let delivery_mode = match message.delivery_mode {
            DeliveryMode::Transient => "1",
            DeliveryMode::Persistent => "2",
        };

        for topic in &topics {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: "content-type",
                    value: Some(message.content_type.as_bytes()),
                })
                .insert(Header {
                    key: "delivery-mode",
                    value: Some(delivery_mode.as_bytes()),
                })
                .insert(Header {
                    key: "routing-key",
                    value: Some(message.routing_key.as_bytes()),
                })
                .insert(Header {
                    key: "event_type",
                    value: Some(message.event_type.as_bytes()),
                })
                .insert(Header {
                    key: "message_id",
                    value: Some(message_id.as_bytes()),
                })
                .insert(Header {
                    key: "timestamp",
                    value: Some(timestamp.as_bytes()),
                });

            let record = FutureRecord::to(topic)
                .key(message_id.as_str())
                .payload(message.payload.as_slice())
                .timestamp(message.timestamp.timestamp_millis())
                .headers(headers);

            self.inner
                .producer
                .send(record, Timeout::After(self.inner.operation_timeout))
                .await
                .map_err(|(err, _)| self.inner.fail(&err))?;

            debug!(topic = %topic, message_id = %message_id, "Record acknowledged");
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.open = false;
        Ok(())
    }
}

/// Map a librdkafka error onto the broker error taxonomy
pub fn classify_kafka_error(err: &KafkaError) -> BrokerError {
    let message = err.to_string();

    match err {
        KafkaError::ClientCreation(reason) => {
            let lowered = reason.to_ascii_lowercase();
            if lowered.contains("ssl") || lowered.contains("tls") {
                BrokerError::TlsRejected(message)
            } else {
                BrokerError::Configuration(message)
            }
        }
        KafkaError::ClientConfig(..) => BrokerError::Configuration(message),
        KafkaError::Canceled => BrokerError::Interrupted(message),
        other => match other.rdkafka_error_code() {
            Some(code) => classify_error_code(code, message),
            None => BrokerError::Other(message),
        },
    }
}

pub fn classify_error_code(code: RDKafkaErrorCode, message: String) -> BrokerError {
    match code {
        RDKafkaErrorCode::Authentication
        | RDKafkaErrorCode::SaslAuthenticationFailed
        | RDKafkaErrorCode::UnsupportedSASLMechanism
        | RDKafkaErrorCode::TopicAuthorizationFailed
        | RDKafkaErrorCode::ClusterAuthorizationFailed => BrokerError::AuthenticationFailed(message),
        RDKafkaErrorCode::SSL => BrokerError::TlsRejected(message),
        RDKafkaErrorCode::BrokerTransportFailure
        | RDKafkaErrorCode::AllBrokersDown
        | RDKafkaErrorCode::Resolve
        | RDKafkaErrorCode::BrokerNotAvailable
        | RDKafkaErrorCode::NetworkException => BrokerError::Unreachable(message),
        RDKafkaErrorCode::BrokerDestroy => BrokerError::ConnectionClosed(message),
        RDKafkaErrorCode::Interrupted => BrokerError::Interrupted(message),
        RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::RequestTimedOut
        | RDKafkaErrorCode::OperationTimedOut
        | RDKafkaErrorCode::QueueFull
        | RDKafkaErrorCode::LeaderNotAvailable
        | RDKafkaErrorCode::NotLeaderForPartition
        | RDKafkaErrorCode::NotEnoughReplicas
        | RDKafkaErrorCode::NotEnoughReplicasAfterAppend => BrokerError::PublishFailed(message),
        _ => BrokerError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerTlsSettings, TlsVersion};

    fn settings(tls: bool) -> BrokerSettings {
        BrokerSettings {
            host: "broker.internal".to_string(),
            port: 5672,
            username: "identity".to_string(),
            password: "secret".to_string(),
            sasl_mechanism: "SCRAM-SHA-512".to_string(),
            tls: tls.then(|| BrokerTlsSettings {
                min_version: TlsVersion::Tls12,
                server_name: Some("broker.internal".to_string()),
                ca_location: Some("/etc/ssl/broker-ca.pem".to_string()),
            }),
            publish_timeout_secs: 10,
            max_retries: 3,
            retry_base_secs: 2,
        }
    }

    #[test]
    fn test_client_config_with_tls() {
        let config = KafkaConnector::new(settings(true)).client_config();

        assert_eq!(config.get("bootstrap.servers"), Some("broker.internal:5672"));
        assert_eq!(config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(config.get("ssl.ca.location"), Some("/etc/ssl/broker-ca.pem"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("message.timeout.ms"), Some("10000"));
    }

    #[test]
    fn test_client_config_without_tls() {
        let config = KafkaConnector::new(settings(false)).client_config();
        assert_eq!(config.get("security.protocol"), Some("SASL_PLAINTEXT"));
        assert_eq!(config.get("ssl.ca.location"), None);
    }

    #[test]
    fn test_credential_and_tls_errors_are_fatal() {
        let auth = classify_error_code(RDKafkaErrorCode::SaslAuthenticationFailed, "x".into());
        let tls = classify_error_code(RDKafkaErrorCode::SSL, "x".into());
        assert!(auth.is_fatal());
        assert!(tls.is_fatal());
        assert!(!auth.is_transient());
    }

    #[test]
    fn test_network_errors_are_transient() {
        for code in [
            RDKafkaErrorCode::AllBrokersDown,
            RDKafkaErrorCode::BrokerTransportFailure,
            RDKafkaErrorCode::MessageTimedOut,
            RDKafkaErrorCode::QueueFull,
            RDKafkaErrorCode::BrokerDestroy,
        ] {
            assert!(classify_error_code(code, "x".into()).is_transient(), "{:?}", code);
        }
    }

    #[test]
    fn test_production_error_classification() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(matches!(
            classify_kafka_error(&err),
            BrokerError::PublishFailed(_)
        ));

        let err = KafkaError::ClientCreation("ssl.ca.location failed: No such file".into());
        assert!(matches!(classify_kafka_error(&err), BrokerError::TlsRejected(_)));
    }

    #[tokio::test]
    async fn test_routing_table_direct_and_fallback() {
        let mut table = RoutingTable::default();
        table
            .exchanges
            .insert("identity-events".to_string(), ExchangeKind::Direct);
        table.bindings.push(Binding {
            exchange: "identity-events".to_string(),
            queue: "account-registered".to_string(),
            routing_key: "account.registered".to_string(),
        });

        assert_eq!(
            table.targets("identity-events", "account.registered"),
            vec!["account-registered".to_string()]
        );
        assert!(table.targets("identity-events", "account.deleted").is_empty());
    }
}
