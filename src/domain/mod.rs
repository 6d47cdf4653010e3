// ============================================================================
// Domain Layer
// ============================================================================
//
// Order aggregate as seen by the event pipeline. The relational model,
// REST validation and repository live in the order service and are not
// modelled here.
//
// ============================================================================

pub mod order;
