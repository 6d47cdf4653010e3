// ============================================================================
// Order Snapshot Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OrderError {
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Order field `{0}` must not be empty")]
    MissingField(&'static str),

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Invalid total amount: {0}")]
    InvalidAmount(f64),
}
