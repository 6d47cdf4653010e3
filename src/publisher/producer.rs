use std::sync::Arc;
use std::time::Instant;

use crate::codec::{self, CodecError, EventType, OrderEvent, SchemaContext};
use crate::config::PipelineConfig;
use crate::domain::order::Order;
use crate::messaging::{EventSink, OutboundRecord};
use crate::metrics::Metrics;

use super::delivery::{DeliveryHandle, DeliveryOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("publish needs a tokio runtime to await the broker acknowledgment")]
    NoRuntime,
}

// ============================================================================
// Order Event Publisher
// ============================================================================
//
// Sends OrderEvents to the order-events topic keyed by order id.
//
// The record is handed to the producer queue synchronously, in call order,
// so events for one order keep their relative order on the partition. Only
// the broker acknowledgment is awaited on a spawned task; the caller never
// blocks on it.
//
// Encoding and framing errors are returned before anything is queued.
//
// ============================================================================

#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn EventSink>,
    schema: Arc<SchemaContext>,
    topic: String,
    metrics: Arc<Metrics>,
}

impl Publisher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        schema: Arc<SchemaContext>,
        config: &PipelineConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sink,
            schema,
            topic: config.topics.order_events.clone(),
            metrics,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode `order` as an `event_type` event and publish it.
    pub fn publish_order(&self, order: &Order, event_type: EventType) -> Result<DeliveryHandle, PublishError> {
        let event = codec::encode(order, event_type)?;
        self.publish(event)
    }

    /// Queue `event` and return immediately. Nothing is queued when called
    /// outside a tokio runtime.
    pub fn publish(&self, event: OrderEvent) -> Result<DeliveryHandle, PublishError> {
        event.validate()?;
        let payload = codec::serialize(&event, &self.schema)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PublishError::NoRuntime)?;

        let mut record = OutboundRecord::new(&self.topic, &event.order_id, payload)
            .with_header("event-type", event.event_type.as_str());
        if let Some(event_id) = &event.event_id {
            record = record.with_header("event-id", event_id.as_str());
        }

        let started = Instant::now();
        let enqueued = self.sink.enqueue(record);
        let metrics = self.metrics.clone();
        let topic = self.topic.clone();

        let task = runtime.spawn(async move {
            let outcome = match enqueued {
                Ok(delivery) => match delivery.await {
                    Ok(report) => DeliveryOutcome::Delivered {
                        partition: report.partition,
                        offset: report.offset,
                    },
                    Err(e) => DeliveryOutcome::Failed { error: e.to_string() },
                },
                Err(e) => DeliveryOutcome::Failed { error: e.to_string() },
            };

            report_outcome(&metrics, &topic, &event, &outcome, started);
            outcome
        });

        Ok(DeliveryHandle::new(task))
    }

    /// Wait for queued records to leave the producer.
    pub fn flush(&self, timeout: std::time::Duration) {
        if let Err(e) = self.sink.flush(timeout) {
            tracing::warn!(error = %e, "Producer flush did not complete");
        }
    }
}

fn report_outcome(metrics: &Metrics, topic: &str, event: &OrderEvent, outcome: &DeliveryOutcome, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let event_type = event.event_type.as_str();

    match outcome {
        DeliveryOutcome::Delivered { partition, offset } => {
            metrics.record_publish(event_type, elapsed, true);
            tracing::info!(
                topic,
                order_id = %event.order_id,
                event_type,
                partition,
                offset,
                "📤 Order event published"
            );
        }
        DeliveryOutcome::Failed { error } => {
            metrics.record_publish(event_type, elapsed, false);
            tracing::error!(
                topic,
                order_id = %event.order_id,
                event_type,
                error = %error,
                "❌ Failed to publish order event"
            );
        }
    }
}
