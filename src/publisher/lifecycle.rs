use crate::codec::EventType;
use crate::domain::order::{Order, OrderStatus};

use super::delivery::DeliveryHandle;
use super::producer::{PublishError, Publisher};

// ============================================================================
// Order Lifecycle Events
// ============================================================================
//
// Entry point for the order service: one call per persisted transition.
// Storage stays with the caller; these methods only derive the event and
// hand it to the publisher.
//
// ============================================================================

/// Event type announcing that an order moved to `status`.
pub fn event_type_for_status(status: OrderStatus) -> EventType {
    match status {
        OrderStatus::Cancelled => EventType::OrderCancelled,
        OrderStatus::Created
        | OrderStatus::Confirmed
        | OrderStatus::Shipped
        | OrderStatus::Delivered => EventType::OrderUpdated,
    }
}

#[derive(Clone)]
pub struct OrderEvents {
    publisher: Publisher,
}

impl OrderEvents {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Announce a freshly saved order.
    pub fn order_created(&self, order: &Order) -> Result<DeliveryHandle, PublishError> {
        tracing::info!(order_id = %order.id, customer_id = %order.customer_id, "Order created");
        self.publisher.publish_order(order, EventType::OrderCreated)
    }

    /// Apply `new_status` to the snapshot and announce it.
    ///
    /// Returns the updated snapshot for the caller to persist.
    pub fn status_changed(&self, order: &Order, new_status: OrderStatus) -> Result<(Order, DeliveryHandle), PublishError> {
        let previous = order.status;
        let updated = order.clone().with_status(new_status);
        let delivery = self
            .publisher
            .publish_order(&updated, event_type_for_status(new_status))?;

        tracing::info!(
            order_id = %updated.id,
            from = %previous,
            to = %new_status,
            "Order status updated"
        );
        Ok((updated, delivery))
    }

    pub fn order_cancelled(&self, order: &Order) -> Result<(Order, DeliveryHandle), PublishError> {
        self.status_changed(order, OrderStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, SchemaContext};
    use crate::config::PipelineConfig;
    use crate::messaging::InMemoryBroker;
    use crate::metrics::Metrics;
    use std::sync::Arc;

    fn order_events(broker: &InMemoryBroker) -> (OrderEvents, Arc<SchemaContext>) {
        let schema = Arc::new(SchemaContext::order_events(2, Some(1)).unwrap());
        let publisher = Publisher::new(
            Arc::new(broker.clone()),
            schema.clone(),
            &PipelineConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        );
        (OrderEvents::new(publisher), schema)
    }

    #[test]
    fn test_event_type_for_status() {
        assert_eq!(event_type_for_status(OrderStatus::Cancelled), EventType::OrderCancelled);
        for status in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert_eq!(event_type_for_status(status), EventType::OrderUpdated);
        }
    }

    #[tokio::test]
    async fn test_lifecycle_publishes_in_order() {
        let broker = InMemoryBroker::new(2);
        let (events, schema) = order_events(&broker);
        let order = Order::new("C1", "a@b.com", "Widget", 2, 19.98).with_id("O1");

        assert!(events.order_created(&order).unwrap().await.is_delivered());
        let (shipped, delivery) = events.status_changed(&order, OrderStatus::Shipped).unwrap();
        assert!(delivery.await.is_delivered());
        assert_eq!(shipped.status, OrderStatus::Shipped);
        let (cancelled, delivery) = events.order_cancelled(&shipped).unwrap();
        assert!(delivery.await.is_delivered());
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let types: Vec<_> = broker
            .records("order-events")
            .iter()
            .map(|r| codec::decode(&r.payload, &schema, r.position()).unwrap().event_type)
            .collect();
        assert_eq!(
            types,
            vec![EventType::OrderCreated, EventType::OrderUpdated, EventType::OrderCancelled]
        );
    }

    #[tokio::test]
    async fn test_cancelling_an_order_twice_is_still_published() {
        let broker = InMemoryBroker::new(1);
        let (events, _) = order_events(&broker);
        let order = Order::new("C1", "a@b.com", "Widget", 1, 1.0);

        let (cancelled, first) = events.order_cancelled(&order).unwrap();
        first.await;
        let (_, second) = events.order_cancelled(&cancelled).unwrap();
        second.await;

        assert_eq!(broker.records("order-events").len(), 2);
    }
}
