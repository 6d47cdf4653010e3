use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Final result of one publish attempt. Not persisted anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { partition: i32, offset: i64 },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered { partition, offset } => {
                write!(f, "delivered to partition {} at offset {}", partition, offset)
            }
            DeliveryOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Handle to an in-flight publish.
///
/// Await it for the [`DeliveryOutcome`] or drop it; the outcome is logged
/// and counted either way.
pub struct DeliveryHandle {
    task: JoinHandle<DeliveryOutcome>,
}

impl DeliveryHandle {
    pub(crate) fn new(task: JoinHandle<DeliveryOutcome>) -> Self {
        Self { task }
    }
}

impl Future for DeliveryHandle {
    type Output = DeliveryOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| DeliveryOutcome::Failed {
                error: format!("delivery task aborted: {}", e),
            })
        })
    }
}
