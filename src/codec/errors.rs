use std::fmt;

use crate::domain::order::{OrderError, OrderStatus};

use super::event::EventType;

// ============================================================================
// Codec Errors
// ============================================================================

/// Construction-time failure. Raised before any bytes reach the broker.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid order snapshot: {0}")]
    InvalidOrder(#[from] OrderError),

    #[error("Event type {event_type} is inconsistent with order status {status}")]
    InconsistentTransition {
        event_type: EventType,
        status: OrderStatus,
    },

    #[error("Avro schema error: {0}")]
    Schema(#[from] apache_avro::Error),

    #[error("Schema id {0} is not registered in the schema context")]
    UnknownSchemaId(u32),
}

/// Where a consumed payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    #[error("empty payload")]
    Empty,

    #[error("unexpected magic byte {0:#04x}")]
    BadMagic(u8),

    #[error("payload shorter than the {0}-byte frame header")]
    Truncated(usize),

    #[error("unknown writer schema id {0}")]
    UnknownSchema(u32),

    #[error("avro: {0}")]
    Avro(String),

    #[error("{0} trailing bytes after datum")]
    TrailingBytes(usize),

    #[error("invalid event: {0}")]
    Invalid(#[from] CodecError),
}

/// A payload that will never become valid. Carries enough of the source
/// record to find it again.
#[derive(Debug, thiserror::Error)]
#[error("Failed to decode {position} ({payload_len} bytes): {failure}")]
pub struct DecodeError {
    pub position: RecordPosition,
    pub payload_len: usize,
    #[source]
    pub failure: DecodeFailure,
}
