use async_trait::async_trait;

use crate::codec::{DecodeError, OrderEvent};

// ============================================================================
// Handler Contract
// ============================================================================
//
// The consumer loop hands every decoded event to one handler. Delivery is
// at-least-once, so a handler may see the same event more than once.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Downstream is unavailable; a later attempt may succeed.
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// The event can never be handled; retrying is pointless.
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

impl IsTransient for HandlerError {
    fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError>;
}

/// Why a record could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingFailure {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl ProcessingFailure {
    /// Metric/DLQ label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingFailure::Decode(_) => "decode",
            ProcessingFailure::Handler(_) => "handler",
        }
    }
}

/// Malformed payloads never become valid.
impl IsTransient for ProcessingFailure {
    fn is_transient(&self) -> bool {
        match self {
            ProcessingFailure::Decode(_) => false,
            ProcessingFailure::Handler(e) => e.is_transient(),
        }
    }
}
