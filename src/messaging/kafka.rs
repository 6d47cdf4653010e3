use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    Offset, TopicPartitionList,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;

use super::broker::{
    BrokerError, ConsumerRecord, DeliveryFuture, DeliveryReport, EventSink, OutboundRecord,
    RecordSource, SourceFactory,
};

// ============================================================================
// Kafka / Redpanda adapters (librdkafka)
// ============================================================================

/// How long a fetch keeps collecting after the first record arrived.
const FETCH_LINGER: Duration = Duration::from_millis(50);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection and security settings shared by producer and consumers.
pub fn base_client_config(config: &PipelineConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("security.protocol", config.security_protocol.as_str());

    if let Some(credentials) = &config.credentials {
        client.set("sasl.mechanism", &credentials.mechanism);
        if let Some(username) = &credentials.username {
            client.set("sasl.username", username);
        }
        if let Some(password) = &credentials.password {
            client.set("sasl.password", password);
        }
    }

    client
}

/// Idempotent, fully-acknowledged producer. In-flight requests stay at or
/// below 5 so retried batches keep per-partition order.
pub fn producer_client_config(config: &PipelineConfig) -> ClientConfig {
    let mut client = base_client_config(config);
    client
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("retries", config.producer.retries.to_string())
        .set(
            "max.in.flight.requests.per.connection",
            config.producer.max_in_flight.to_string(),
        )
        .set("compression.type", "snappy")
        .set(
            "message.timeout.ms",
            config.producer.message_timeout.as_millis().to_string(),
        );
    client
}

/// Manual-commit consumer for the configured group.
pub fn consumer_client_config(config: &PipelineConfig) -> ClientConfig {
    let settings = &config.consumer;
    let mut client = base_client_config(config);
    client
        .set("group.id", &config.consumer_group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", settings.session_timeout.as_millis().to_string())
        .set(
            "heartbeat.interval.ms",
            settings.heartbeat_interval.as_millis().to_string(),
        )
        .set(
            "max.poll.interval.ms",
            settings.max_poll_interval.as_millis().to_string(),
        );
    client
}

// ----------------------------------------------------------------------------
// Producer
// ----------------------------------------------------------------------------

pub struct KafkaSink {
    producer: FutureProducer,
}

impl KafkaSink {
    pub fn new(config: &PipelineConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;

        tracing::info!(
            brokers = %config.bootstrap_servers,
            security_protocol = config.security_protocol.as_str(),
            retries = config.producer.retries,
            "Kafka producer created"
        );

        Ok(Self { producer })
    }
}

impl EventSink for KafkaSink {
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            });

        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        // send_result queues synchronously; only the ack is awaited.
        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| BrokerError::Send(e.to_string()))?;

        Ok(Box::pin(async move {
            match delivery.await {
                Ok(Ok(delivery)) => Ok(DeliveryReport {
                    partition: delivery.partition,
                    offset: delivery.offset,
                }),
                Ok(Err((e, _))) => Err(BrokerError::Send(e.to_string())),
                Err(_) => Err(BrokerError::Send("producer dropped before delivery".to_string())),
            }
        }))
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(timeout)
            .map_err(|e| BrokerError::Send(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Consumer
// ----------------------------------------------------------------------------

pub struct KafkaSourceFactory {
    client: ClientConfig,
    topic: String,
}

impl KafkaSourceFactory {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            client: consumer_client_config(config),
            topic: config.topics.order_events.clone(),
        }
    }
}

#[async_trait]
impl SourceFactory for KafkaSourceFactory {
    async fn new_source(&self, worker_id: usize) -> Result<Box<dyn RecordSource>, BrokerError> {
        let mut client = self.client.clone();
        if let Some(group) = client.get("group.id") {
            let client_id = format!("{group}-worker-{worker_id}");
            client.set("client.id", client_id);
        }

        let consumer: StreamConsumer = client
            .create()
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| BrokerError::Client(e.to_string()))?;

        tracing::debug!(worker_id, topic = %self.topic, "Kafka consumer subscribed");

        Ok(Box::new(KafkaSource {
            consumer: Arc::new(consumer),
            topic: self.topic.clone(),
        }))
    }
}

/// Commit and seek block inside librdkafka, so they run on the blocking
/// pool with a shared handle to the consumer.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumerRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    ConsumerRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn fetch(&mut self, max_records: usize) -> Result<Vec<ConsumerRecord>, BrokerError> {
        let first = self
            .consumer
            .recv()
            .await
            .map(|message| to_record(&message))
            .map_err(|e| BrokerError::Fetch(e.to_string()))?;
        let mut batch = vec![first];

        while batch.len() < max_records {
            match tokio::time::timeout(FETCH_LINGER, self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(to_record(&message)),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Kafka error while filling batch");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let commit_error = |reason: String| BrokerError::Commit {
            partition,
            offset,
            reason,
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| commit_error(e.to_string()))?;

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| commit_error(format!("commit task failed: {}", e)))?
            .map_err(|e| commit_error(e.to_string()))
    }

    async fn rewind(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let seek_error = |reason: String| BrokerError::Seek {
            partition,
            offset,
            reason,
        };

        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| seek_error(format!("seek task failed: {}", e)))?
        .map_err(|e| seek_error(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SaslCredentials, SecurityProtocol};

    #[test]
    fn test_producer_config_is_idempotent_and_acks_all() {
        let client = producer_client_config(&PipelineConfig::default());

        assert_eq!(client.get("enable.idempotence"), Some("true"));
        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("retries"), Some("3"));
        assert_eq!(client.get("max.in.flight.requests.per.connection"), Some("5"));
        assert_eq!(client.get("compression.type"), Some("snappy"));
    }

    #[test]
    fn test_consumer_config_disables_auto_commit() {
        let client = consumer_client_config(&PipelineConfig::default());

        assert_eq!(client.get("group.id"), Some("notification-service"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("session.timeout.ms"), Some("30000"));
    }

    #[test]
    fn test_sasl_settings_are_forwarded() {
        let config = PipelineConfig {
            security_protocol: SecurityProtocol::SaslSsl,
            credentials: Some(SaslCredentials {
                mechanism: "PLAIN".to_string(),
                username: Some("svc".to_string()),
                password: Some("secret".to_string()),
            }),
            ..PipelineConfig::default()
        };
        let client = base_client_config(&config);

        assert_eq!(client.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(client.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(client.get("sasl.username"), Some("svc"));
    }

    #[tokio::test]
    async fn test_rewind_of_unassigned_partition_reports_seek_error() {
        let consumer: StreamConsumer = consumer_client_config(&PipelineConfig::default())
            .create()
            .unwrap();
        let mut source = KafkaSource {
            consumer: Arc::new(consumer),
            topic: "order-events".to_string(),
        };

        let result = source.rewind(0, 5).await;
        assert!(matches!(
            result,
            Err(BrokerError::Seek {
                partition: 0,
                offset: 5,
                ..
            })
        ));
    }
}
