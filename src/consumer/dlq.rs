use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::codec::{EventType, OrderEvent};
use crate::messaging::{BrokerError, ConsumerRecord, DeliveryReport, EventSink, OutboundRecord};

use super::handler::ProcessingFailure;

// ============================================================================
// Dead Letter Writer
// ============================================================================
//
// Records that failed for good are copied to the dead-letter topic with the
// failure reason, so they can be inspected and replayed by hand. The source
// offset is committed whether or not this write succeeds; a failed write is
// reported to the caller and must be alerted on.
//
// ============================================================================

/// Value written to the dead-letter topic (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    pub key: Option<String>,
    pub order_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Original record value, base64.
    pub payload: String,
    pub error_message: String,
    pub failure_kind: String,
    pub failure_count: u32,
    /// Milliseconds since epoch.
    pub failed_at: i64,
}

impl DeadLetterRecord {
    pub fn new(
        record: &ConsumerRecord,
        event: Option<&OrderEvent>,
        failure: &ProcessingFailure,
        failure_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_topic: record.topic.clone(),
            source_partition: record.partition,
            source_offset: record.offset,
            key: record.key.clone(),
            order_id: event.map(|e| e.order_id.clone()),
            event_type: event.map(|e| e.event_type),
            payload: STANDARD.encode(&record.payload),
            error_message: failure.to_string(),
            failure_kind: failure.kind().to_string(),
            failure_count,
            failed_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn original_payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.payload)
    }

    /// Order id when the payload decoded, else the source key.
    fn routing_key(&self) -> String {
        self.order_id
            .clone()
            .or_else(|| self.key.clone())
            .unwrap_or_else(|| format!("{}-{}", self.source_partition, self.source_offset))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize dead letter: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Dead-letter send failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("Dead-letter write not acknowledged within {0:?}")]
    Timeout(Duration),
}

pub struct DeadLetterWriter {
    sink: Arc<dyn EventSink>,
    topic: String,
    timeout: Duration,
}

impl DeadLetterWriter {
    pub fn new(sink: Arc<dyn EventSink>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sink,
            topic: topic.into(),
            timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Write one dead letter and wait (bounded) for the broker ack.
    pub async fn write(
        &self,
        record: &ConsumerRecord,
        event: Option<&OrderEvent>,
        failure: &ProcessingFailure,
        failure_count: u32,
    ) -> Result<DeliveryReport, DlqError> {
        let letter = DeadLetterRecord::new(record, event, failure, failure_count);

        tracing::error!(
            dlq_id = %letter.id,
            order_id = letter.order_id.as_deref().unwrap_or("<undecoded>"),
            partition = record.partition,
            offset = record.offset,
            kind = %letter.failure_kind,
            error = %letter.error_message,
            failure_count,
            "💀 Sending record to dead letter topic"
        );

        let outbound = OutboundRecord::new(&self.topic, letter.routing_key(), serde_json::to_vec(&letter)?)
            .with_header("dlq-kind", letter.failure_kind.as_str())
            .with_header("dlq-source", record.position().to_string());

        let delivery = self.sink.enqueue(outbound)?;
        let report = tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| DlqError::Timeout(self.timeout))??;

        tracing::info!(
            dlq_id = %letter.id,
            dlq_partition = report.partition,
            dlq_offset = report.offset,
            "Dead letter stored"
        );

        Ok(report)
    }
}
