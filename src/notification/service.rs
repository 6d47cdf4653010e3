use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::codec::{EventType, OrderEvent};
use crate::config::NotificationSettings;
use crate::consumer::{EventHandler, HandlerError};

use super::channel::{ChannelError, EmailChannel, Notification, NotificationChannel, SmsChannel};

// ============================================================================
// Notification Service - EventHandler for the order-events consumer
// ============================================================================
//
// Turns each order event into one customer message and sends it on every
// enabled channel. Redelivered events that carry an event id already sent
// are acknowledged without sending again.
//
// ============================================================================

const RECENT_EVENT_CAPACITY: usize = 4096;

/// Message text for an event.
pub fn compose(event: &OrderEvent) -> Notification {
    let (subject, body) = match event.event_type {
        EventType::OrderCreated => (
            "Order Confirmation",
            format!(
                "Order Confirmed! Order #{} for {} (Qty: {}) - Total: ${:.2}",
                event.order_id, event.product_name, event.quantity, event.total_amount
            ),
        ),
        EventType::OrderUpdated => (
            "Order Update",
            format!("Order Update: Order #{} status changed to {}", event.order_id, event.status),
        ),
        EventType::OrderCancelled => (
            "Order Cancelled",
            format!(
                "Order Cancelled: Order #{} has been cancelled. Refund will be processed.",
                event.order_id
            ),
        ),
    };

    Notification {
        recipient: event.customer_email.clone(),
        subject: subject.to_string(),
        body,
    }
}

/// Bounded memory of event ids already notified.
struct RecentEvents {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentEvents {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.seen.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

pub struct NotificationService {
    channels: Vec<Arc<dyn NotificationChannel>>,
    recent: Mutex<RecentEvents>,
}

impl NotificationService {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self {
            channels,
            recent: Mutex::new(RecentEvents::new(RECENT_EVENT_CAPACITY)),
        }
    }

    pub fn from_config(settings: &NotificationSettings) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        if settings.email_enabled {
            channels.push(Arc::new(EmailChannel::new(settings.email_from.clone())));
        }
        if settings.sms_enabled {
            channels.push(Arc::new(SmsChannel));
        }
        if channels.is_empty() {
            tracing::warn!("No notification channels enabled; events will only be logged");
        }
        Self::new(channels)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn already_sent(&self, event: &OrderEvent) -> bool {
        match &event.event_id {
            Some(id) => self.recent.lock().unwrap_or_else(PoisonError::into_inner).contains(id),
            None => false,
        }
    }

    fn mark_sent(&self, event: &OrderEvent) {
        if let Some(id) = &event.event_id {
            self.recent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone());
        }
    }
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        tracing::info!(
            order_id = %event.order_id,
            event_type = %event.event_type,
            status = %event.status,
            "Processing order event"
        );

        if self.already_sent(event) {
            tracing::info!(
                order_id = %event.order_id,
                event_id = event.event_id.as_deref().unwrap_or_default(),
                "Duplicate delivery, notification already sent"
            );
            return Ok(());
        }

        let notification = compose(event);
        for channel in &self.channels {
            channel.send(&notification).await.map_err(|e| match e {
                ChannelError::Unavailable { .. } => HandlerError::Transient(e.to_string()),
                ChannelError::Rejected { .. } => HandlerError::Permanent(e.to_string()),
            })?;
        }

        self.mark_sent(event);
        Ok(())
    }
}
