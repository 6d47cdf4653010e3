// ============================================================================
// Publisher
// ============================================================================
//
// - producer:   keyed, non-blocking publish of OrderEvents
// - delivery:   DeliveryOutcome and the awaitable handle
// - lifecycle:  domain-facing create / update / cancel entry points
//
// ============================================================================

mod delivery;
mod lifecycle;
mod producer;

pub use delivery::{DeliveryHandle, DeliveryOutcome};
pub use lifecycle::{event_type_for_status, OrderEvents};
pub use producer::{PublishError, Publisher};
