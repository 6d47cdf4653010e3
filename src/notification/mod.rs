// ============================================================================
// Notification Dispatcher
// ============================================================================
//
// - channel:  Notification, the channel trait, email / SMS channels
// - service:  NotificationService, the consumer's EventHandler
//
// ============================================================================

mod channel;
mod service;

pub use channel::{ChannelError, EmailChannel, Notification, NotificationChannel, SmsChannel};
pub use service::{compose, NotificationService};
