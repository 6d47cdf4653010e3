use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::order::{Order, OrderError, OrderStatus};

use super::errors::CodecError;

// ============================================================================
// Order Event - the record written to the order-events topic
// ============================================================================

/// Which domain transition produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderCreated,
    OrderUpdated,
    OrderCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderUpdated => "ORDER_UPDATED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as it appears on the wire. Symbol order matches the Avro enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireStatus {
    Created,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl From<OrderStatus> for WireStatus {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Created => WireStatus::Created,
            OrderStatus::Confirmed => WireStatus::Confirmed,
            OrderStatus::Shipped => WireStatus::Shipped,
            OrderStatus::Delivered => WireStatus::Delivered,
            OrderStatus::Cancelled => WireStatus::Cancelled,
        }
    }
}

impl From<WireStatus> for OrderStatus {
    fn from(status: WireStatus) -> Self {
        match status {
            WireStatus::Created => OrderStatus::Created,
            WireStatus::Confirmed => OrderStatus::Confirmed,
            WireStatus::Shipped => OrderStatus::Shipped,
            WireStatus::Delivered => OrderStatus::Delivered,
            WireStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

impl fmt::Display for WireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        OrderStatus::from(*self).fmt(f)
    }
}

/// Immutable point-in-time fact about an order.
///
/// Field names follow the Avro record (`camelCase`). `event_id` was added in
/// schema v2 as an optional field, so v1 payloads still decode with `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: String,
    pub customer_id: String,
    pub customer_email: String,
    pub product_name: String,
    pub quantity: i32,
    pub total_amount: f64,
    pub status: WireStatus,
    pub event_timestamp: i64,
    pub event_type: EventType,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl OrderEvent {
    /// Field and transition checks shared by the producer and consumer side.
    pub fn validate(&self) -> Result<(), CodecError> {
        let required = [
            ("orderId", &self.order_id),
            ("customerId", &self.customer_id),
            ("customerEmail", &self.customer_email),
            ("productName", &self.product_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::MissingField(name).into());
            }
        }
        if self.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(self.quantity).into());
        }
        if !self.total_amount.is_finite() || self.total_amount <= 0.0 {
            return Err(OrderError::InvalidAmount(self.total_amount).into());
        }

        check_transition(self.event_type, self.status.into())
    }
}

/// Created events carry a Created order, Cancelled events and only
/// Cancelled events carry a Cancelled order.
fn check_transition(event_type: EventType, status: OrderStatus) -> Result<(), CodecError> {
    let consistent = match event_type {
        EventType::OrderCreated => status == OrderStatus::Created,
        EventType::OrderCancelled => status == OrderStatus::Cancelled,
        EventType::OrderUpdated => status != OrderStatus::Cancelled,
    };

    if consistent {
        Ok(())
    } else {
        Err(CodecError::InconsistentTransition { event_type, status })
    }
}

/// Build the event for one domain transition. Stamps the event time now.
pub fn encode(order: &Order, event_type: EventType) -> Result<OrderEvent, CodecError> {
    order.validate()?;
    check_transition(event_type, order.status)?;

    let event = OrderEvent {
        order_id: order.id.clone(),
        customer_id: order.customer_id.clone(),
        customer_email: order.customer_email.clone(),
        product_name: order.product_name.clone(),
        quantity: order.quantity,
        total_amount: order.total_amount,
        status: order.status.into(),
        event_timestamp: Utc::now().timestamp_millis(),
        event_type,
        event_id: Some(Uuid::new_v4().to_string()),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_order() -> Order {
        Order::new("C1", "a@b.com", "Widget", 2, 19.98).with_id("O1")
    }

    #[test]
    fn test_encode_copies_snapshot_and_stamps_time() {
        let before = Utc::now().timestamp_millis();
        let event = encode(&widget_order(), EventType::OrderCreated).unwrap();

        assert_eq!(event.order_id, "O1");
        assert_eq!(event.customer_id, "C1");
        assert_eq!(event.customer_email, "a@b.com");
        assert_eq!(event.product_name, "Widget");
        assert_eq!(event.quantity, 2);
        assert_eq!(event.total_amount, 19.98);
        assert_eq!(event.status, WireStatus::Created);
        assert_eq!(event.event_type, EventType::OrderCreated);
        assert!(event.event_timestamp >= before);
        assert!(event.event_id.is_some());
    }

    #[test]
    fn test_status_mapping_preserves_every_variant() {
        for status in OrderStatus::ALL {
            let wire = WireStatus::from(status);
            assert_eq!(OrderStatus::from(wire), status);
            assert_eq!(wire.to_string(), status.as_str());
        }
    }

    #[test]
    fn test_cancelled_status_requires_cancelled_event() {
        let cancelled = widget_order().with_status(OrderStatus::Cancelled);

        let err = encode(&cancelled, EventType::OrderUpdated).unwrap_err();
        assert!(matches!(err, CodecError::InconsistentTransition { .. }));

        let event = encode(&cancelled, EventType::OrderCancelled).unwrap();
        assert_eq!(event.status, WireStatus::Cancelled);
    }

    #[test]
    fn test_cancelled_event_requires_cancelled_status() {
        let shipped = widget_order().with_status(OrderStatus::Shipped);
        assert!(encode(&shipped, EventType::OrderCancelled).is_err());
        assert!(encode(&shipped, EventType::OrderCreated).is_err());
        assert!(encode(&shipped, EventType::OrderUpdated).is_ok());
    }

    #[test]
    fn test_encode_rejects_invalid_snapshot() {
        let mut order = widget_order();
        order.quantity = -1;

        let err = encode(&order, EventType::OrderCreated).unwrap_err();
        assert!(matches!(err, CodecError::InvalidOrder(OrderError::InvalidQuantity(-1))));
    }

    #[test]
    fn test_wire_enum_names() {
        assert_eq!(serde_json::to_string(&EventType::OrderCancelled).unwrap(), "\"ORDER_CANCELLED\"");
        assert_eq!(serde_json::to_string(&WireStatus::Delivered).unwrap(), "\"DELIVERED\"");
    }
}
