use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::time::Duration;

use crate::codec::RecordPosition;

// ============================================================================
// Broker Abstractions
// ============================================================================
//
// The pipeline talks to the log through two seams:
// - EventSink:    enqueue a keyed record, get a future for the broker ack
// - RecordSource: fetch/commit/rewind for one consumer-group member
//
// The Kafka adapter and the in-memory log both implement them.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to create broker client: {0}")]
    Client(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Commit of partition {partition} offset {offset} failed: {reason}")]
    Commit {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Seek to partition {partition} offset {offset} failed: {reason}")]
    Seek {
        partition: i32,
        offset: i64,
        reason: String,
    },
}

/// A record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub partition: i32,
    pub offset: i64,
}

/// Resolves once the broker acknowledged (or gave up on) the record.
pub type DeliveryFuture = BoxFuture<'static, Result<DeliveryReport, BrokerError>>;

/// A record as received by a consumer-group member.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl ConsumerRecord {
    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Producer side. `enqueue` must not wait for the broker: records are queued
/// in call order, which is what keeps same-key events ordered.
pub trait EventSink: Send + Sync {
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError>;

    /// Wait for queued records to be acknowledged, up to `timeout`.
    fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// One member of a consumer group. Partition ownership is exclusive to the
/// member for as long as it holds the assignment.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait until at least one record is available, return at most `max_records`.
    async fn fetch(&mut self, max_records: usize) -> Result<Vec<ConsumerRecord>, BrokerError>;

    /// Mark `offset` on `partition` as processed. The group resumes at `offset + 1`.
    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError>;

    /// Make the next fetch on `partition` start again at `offset`.
    async fn rewind(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError>;

    /// Leave the group so the partitions can be reassigned.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Creates one source per consumer worker.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn new_source(&self, worker_id: usize) -> Result<Box<dyn RecordSource>, BrokerError>;
}
