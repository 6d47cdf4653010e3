// ============================================================================
// Consumer
// ============================================================================
//
// - handler:        contract with the downstream collaborator
// - policy:         retry / dead-letter decision per failed record
// - dlq:            dead-letter record and writer
// - worker:         per-member fetch / process / commit cycle
// - consumer_loop:  starts and joins the workers of one group
//
// ============================================================================

mod consumer_loop;
mod dlq;
mod handler;
mod policy;
mod worker;

pub use consumer_loop::ConsumerLoop;
pub use dlq::{DeadLetterRecord, DeadLetterWriter, DlqError};
pub use handler::{EventHandler, HandlerError, IsTransient, ProcessingFailure};
pub use policy::{Decision, RetryPolicy};
pub use worker::LoopState;
