// ============================================================================
// order-events - order lifecycle events over Kafka / Redpanda
// ============================================================================
//
// Producer side:  domain transition -> OrderEvent -> keyed, acknowledged send
// Consumer side:  fetch -> decode -> notify -> commit, with bounded retry and
//                 a dead-letter topic for records that cannot be processed
//
// ============================================================================

pub mod codec;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod notification;
pub mod publisher;

pub use codec::{EventType, OrderEvent, SchemaContext};
pub use config::PipelineConfig;
pub use consumer::{ConsumerLoop, DeadLetterWriter, EventHandler, HandlerError, RetryPolicy};
pub use domain::order::{Order, OrderStatus};
pub use notification::NotificationService;
pub use publisher::{DeliveryHandle, DeliveryOutcome, OrderEvents, PublishError, Publisher};
