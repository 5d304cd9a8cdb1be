//! librdkafka-backed read port.
//!
//! Every call runs the blocking librdkafka API on the blocking thread pool.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::metadata::Metadata;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::connection::{ClusterConnection, ConnectionError};
use crate::models::{PartitionId, TopicName};
use crate::ports::{OffsetRange, PortResult, ReadPort};

/// Session timeout of the short-lived metadata consumer, in milliseconds
const METADATA_SESSION_TIMEOUT_MS: &str = "6000";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct KafkaReader {
    consumer: Arc<BaseConsumer>,
    request_timeout: Duration,
}

impl KafkaReader {
    pub fn connect(connection: &ClusterConnection) -> Result<Self, ConnectionError> {
        let mut config = ClientConfig::new();
        for (key, value) in connection.client_properties() {
            config.set(key, value);
        }
        config.set("session.timeout.ms", METADATA_SESSION_TIMEOUT_MS);

        let consumer: BaseConsumer = config.create().map_err(|err| ConnectionError::Connection {
            brokers: connection.bootstrap_servers().join(","),
            message: err.to_string(),
        })?;
        info!(
            brokers = ?connection.bootstrap_servers(),
            security_protocol = connection.security_protocol(),
            "Kafka reader created"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn blocking<T, F>(&self, operation: &'static str, call: F) -> PortResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&BaseConsumer, Duration) -> KafkaResult<T> + Send + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || call(&consumer, timeout))
            .await
            .map_err(|err| ConnectionError::request(operation, err))?
            .map_err(|err| classify(operation, err))
    }

    /// Fetch metadata and extract owned data from it on the blocking thread
    async fn with_metadata<T, F>(&self, operation: &'static str, topic: Option<String>, extract: F) -> PortResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Metadata) -> T + Send + 'static,
    {
        self.blocking(operation, move |consumer, timeout| {
            let metadata = consumer.fetch_metadata(topic.as_deref(), timeout)?;
            Ok(extract(&metadata))
        })
        .await
    }
}

fn classify(operation: &str, err: KafkaError) -> ConnectionError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => ConnectionError::Auth(err.to_string()),
        _ => ConnectionError::request(operation, err),
    }
}

#[async_trait]
impl ReadPort for KafkaReader {
    async fn list_topics(&self) -> PortResult<Vec<TopicName>> {
        self.with_metadata("list topics", None, |metadata| {
            metadata
                .topics()
                .iter()
                .map(|topic| topic.name().to_string())
                .collect()
        })
        .await
    }

    async fn partitions(&self, topic: &str) -> PortResult<Vec<PartitionId>> {
        let name = topic.to_string();
        self.with_metadata("list partitions", Some(name.clone()), move |metadata| {
            metadata
                .topics()
                .iter()
                .filter(|t| t.name() == name)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect()
        })
        .await
    }

    async fn offsets(&self, topic: &str, partition: PartitionId) -> PortResult<OffsetRange> {
        let name = topic.to_string();
        let (low, high) = self
            .blocking("fetch offsets", move |consumer, timeout| {
                consumer.fetch_watermarks(&name, partition, timeout)
            })
            .await?;
        Ok(OffsetRange::new(low, high))
    }
}
