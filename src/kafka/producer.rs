use crate::config::HubConfig;
use crate::error::is_auth_code;
use crate::hub::{Batch, HubClient, HubProperties};
use crate::kafka::ConnectionString;
use crate::message::{Message, CORRELATION_ID, MESSAGE_ID};
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Hub client speaking the Kafka protocol.
pub struct KafkaHubClient {
    producer: FutureProducer,
    hub_name: String,
    max_batch_bytes: usize,
    timeout: Duration,
}

impl KafkaHubClient {
    pub fn new(hub: &HubConfig, max_batch_bytes: usize, timeout: Duration) -> Result<Self> {
        let producer: FutureProducer = client_config(hub, max_batch_bytes, timeout)?
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            producer,
            hub_name: hub.hub_name.clone(),
            max_batch_bytes,
            timeout,
        })
    }

    async fn enqueue(&self, message: &Message) -> Result<DeliveryFuture> {
        let payload = serde_json::to_vec(&message.body)?;
        let headers = headers(message)?;
        let mut record = FutureRecord::<str, [u8]>::to(&self.hub_name)
            .payload(&payload)
            .headers(headers);
        if let Some(key) = message.partition_key.as_deref() {
            record = record.key(key);
        }

        loop {
            match self.producer.send_result(record) {
                Ok(delivery) => return Ok(delivery),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    // librdkafka drains its queue in the background. Retrying in
                    // place keeps the enqueue order of the batch.
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                    record = returned;
                }
                Err((e, _)) => return Err(Error::Kafka(e)),
            }
        }
    }
}

/// Classifies a failure seen while connecting.
///
/// Unreachable brokers and rejected credentials are configuration problems
/// at this point, so they become user errors.
fn connect_error(error: KafkaError) -> Error {
    match error.rdkafka_error_code() {
        Some(code) if is_auth_code(code) => Error::Authentication(error.to_string()),
        Some(
            RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::MessageTimedOut,
        ) => Error::Connection(error.to_string()),
        _ => Error::Kafka(error),
    }
}

fn client_config(
    hub: &HubConfig,
    max_batch_bytes: usize,
    timeout: Duration,
) -> Result<ClientConfig> {
    let mut config = ClientConfig::new();

    match hub.brokers.as_ref().filter(|b| !b.is_empty()) {
        Some(brokers) => {
            config.set("bootstrap.servers", brokers.join(","));
        }
        None => {
            let connection = ConnectionString::parse(&hub.connection_string)?;
            connection.check_entity_path(&hub.hub_name)?;
            config
                .set("bootstrap.servers", connection.bootstrap_server())
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", "$ConnectionString")
                .set("sasl.password", &hub.connection_string);
        }
    }

    config
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("linger.ms", "5")
        .set("message.max.bytes", max_batch_bytes.to_string())
        .set("message.timeout.ms", timeout.as_millis().to_string())
        .set("socket.timeout.ms", timeout.as_millis().to_string());

    Ok(config)
}

fn headers(message: &Message) -> Result<OwnedHeaders> {
    let mut pairs: Vec<(&str, Vec<u8>)> = Vec::new();
    if let Some(properties) = &message.properties {
        for (key, value) in properties {
            let bytes = match value {
                Value::String(s) => s.as_bytes().to_vec(),
                other => serde_json::to_vec(other)?,
            };
            pairs.push((key.as_str(), bytes));
        }
    }
    if let Some(id) = &message.correlation_id {
        pairs.push((CORRELATION_ID, id.as_bytes().to_vec()));
    }
    if let Some(id) = &message.message_id {
        pairs.push((MESSAGE_ID, id.as_bytes().to_vec()));
    }

    let capacity = pairs.len();
    Ok(pairs
        .into_iter()
        .fold(OwnedHeaders::new_with_capacity(capacity), |headers, (key, value)| {
            headers.insert(Header {
                key,
                value: Some(value.as_slice()),
            })
        }))
}

#[async_trait]
impl HubClient for KafkaHubClient {
    #[instrument(skip(self), fields(hub = %self.hub_name))]
    async fn connect(&self) -> Result<HubProperties> {
        info!("Fetching hub metadata");
        let producer = self.producer.clone();
        let hub_name = self.hub_name.clone();
        let timeout = self.timeout;

        let topic = tokio::task::spawn_blocking(move || {
            let metadata = producer.client().fetch_metadata(Some(hub_name.as_str()), timeout)?;
            Ok::<_, KafkaError>(
                metadata
                    .topics()
                    .iter()
                    .find(|topic| topic.name() == hub_name)
                    .map(|topic| {
                        let partitions: Vec<String> =
                            topic.partitions().iter().map(|p| p.id().to_string()).collect();
                        (topic.error(), partitions)
                    }),
            )
        })
        .await
        .map_err(|e| Error::Pipeline(format!("metadata task failed: {}", e)))?
        .map_err(connect_error)?;

        let (error, partition_ids) = topic.ok_or_else(|| {
            Error::Connection(format!("Event hub \"{}\" not found.", self.hub_name))
        })?;
        if let Some(err) = error {
            return Err(connect_error(KafkaError::MetadataFetch(err.into())));
        }
        if partition_ids.is_empty() {
            return Err(Error::Connection(format!(
                "Event hub \"{}\" not found.",
                self.hub_name
            )));
        }

        Ok(HubProperties {
            name: self.hub_name.clone(),
            partition_ids,
        })
    }

    #[instrument(
        skip(self, batch),
        fields(partition_key = ?batch.partition_key(), items = batch.len())
    )]
    async fn send_batch(&self, batch: &Batch) -> Result<()> {
        // Enqueue one by one so librdkafka sees the batch order.
        let mut deliveries = Vec::with_capacity(batch.len());
        for message in batch.messages() {
            deliveries.push(self.enqueue(message).await?);
        }

        for delivery in futures::future::join_all(deliveries).await {
            match delivery {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => return Err(Error::Kafka(e)),
                Err(_) => {
                    return Err(Error::Pipeline("delivery was canceled".to_string()));
                }
            }
        }
        debug!(bytes = batch.size_bytes(), "Batch acknowledged");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Pipeline(format!("flush task failed: {}", e)))?;
        if let Err(e) = flushed {
            warn!("Failed to flush producer on close: {}", e);
            return Err(Error::Kafka(e));
        }
        info!("Hub producer closed");
        Ok(())
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }
}
