use std::time::Duration;

use crate::messaging::ConsumerRecord;

use super::handler::{IsTransient, ProcessingFailure};

// ============================================================================
// Retry / Dead-Letter Policy
// ============================================================================
//
// Decides, per failed record, between leaving it uncommitted for redelivery
// and routing it to the dead-letter topic. `max_attempts` counts every
// processing attempt, so 1 dead-letters on the first failure.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of processing attempts per record
    pub max_attempts: u32,
    /// Delay before the first redelivery
    pub initial_backoff: Duration,
    /// Maximum delay between redeliveries
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Do not commit; redeliver after `backoff`.
    Retry { backoff: Duration },
    /// Write to the dead-letter topic and commit past the record.
    DeadLetter,
}

impl RetryPolicy {
    /// Retry transient failures up to `max_attempts` in total.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// `attempt` is 1-based and includes the attempt that just failed.
    pub fn decide(&self, record: &ConsumerRecord, failure: &ProcessingFailure, attempt: u32) -> Decision {
        let decision = if failure.is_transient() && attempt < self.max_attempts {
            Decision::Retry {
                backoff: self.backoff_for(attempt),
            }
        } else {
            Decision::DeadLetter
        };

        tracing::debug!(
            partition = record.partition,
            offset = record.offset,
            attempt,
            max_attempts = self.max_attempts,
            kind = failure.kind(),
            decision = ?decision,
            "Retry policy decision"
        );

        decision
    }

    /// `initial_backoff * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(millis as u64)
    }
}
