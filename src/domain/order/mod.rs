// ============================================================================
// Order Domain - the read-only snapshot the event pipeline publishes from
// ============================================================================
//
// Persistence owns the order lifecycle. The pipeline only reads:
// - Value objects (OrderStatus)
// - The Order snapshot
// - Errors raised while turning raw persisted values into typed ones
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod snapshot;

pub use value_objects::*;
pub use errors::*;
pub use snapshot::*;
