use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Snapshot
// ============================================================================
//
// Point-in-time copy of the persisted order. Events are built from this;
// nothing in the pipeline writes it back.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub customer_email: String,
    pub product_name: String,
    pub quantity: i32,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// New order in `Created` status with a fresh identifier.
    pub fn new(
        customer_id: impl Into<String>,
        customer_email: impl Into<String>,
        product_name: impl Into<String>,
        quantity: i32,
        total_amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.into(),
            customer_email: customer_email.into(),
            product_name: product_name.into(),
            quantity,
            total_amount,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Snapshot after a status change, as the order service would persist it.
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    pub fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("id", &self.id),
            ("customer_id", &self.customer_id),
            ("customer_email", &self.customer_email),
            ("product_name", &self.product_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::MissingField(name));
            }
        }

        if self.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(self.quantity));
        }

        if !self.total_amount.is_finite() || self.total_amount <= 0.0 {
            return Err(OrderError::InvalidAmount(self.total_amount));
        }

        Ok(())
    }
}
