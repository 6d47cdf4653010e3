use async_trait::async_trait;

/// One message for one customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Provider down or throttling; try again later.
    #[error("{channel} unavailable: {reason}")]
    Unavailable { channel: &'static str, reason: String },

    /// Provider refused the message (bad address, content policy, ...).
    #[error("{channel} rejected message: {reason}")]
    Rejected { channel: &'static str, reason: String },
}

/// A way of reaching the customer.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;
}

/// Email sender. Delivery to a mail provider is not wired up; the message
/// is logged with the configured sender address.
pub struct EmailChannel {
    from: String,
}

impl EmailChannel {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        tracing::info!(
            from = %self.from,
            to = %notification.recipient,
            subject = %notification.subject,
            body = %notification.body,
            "📧 EMAIL"
        );
        Ok(())
    }
}

/// SMS sender, logging only.
pub struct SmsChannel;

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        tracing::info!(
            to = %notification.recipient,
            message = %notification.body,
            "📱 SMS"
        );
        Ok(())
    }
}
