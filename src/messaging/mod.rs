// ============================================================================
// Messaging
// ============================================================================
//
// - broker:  sink/source traits and record types
// - kafka:   rdkafka-backed producer and consumer-group members
// - memory:  in-process partitioned log with group offsets
//
// ============================================================================

mod broker;
pub mod kafka;
pub mod memory;

pub use broker::{
    BrokerError, ConsumerRecord, DeliveryFuture, DeliveryReport, EventSink, OutboundRecord,
    RecordSource, SourceFactory,
};
pub use kafka::{KafkaSink, KafkaSourceFactory};
pub use memory::{InMemoryBroker, InMemorySourceFactory};
