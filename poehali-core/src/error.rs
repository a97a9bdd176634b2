use std::time::Duration;

/// Infrastructure failures. Nothing was applied when one of these is returned,
/// so callers may retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// The store refused the write outright (constraint, out-of-range value).
    /// Retrying the same request fails the same way.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Unavailable(_))
    }
}

/// Ride inventory and booking errors
#[derive(Debug, thiserror::Error)]
pub enum RideError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Ride offer not found")]
    NotFound,
    #[error("Ride offer is not active")]
    Inactive,
    #[error("Ride offer has expired")]
    Expired,
    #[error("Not enough seats: requested {requested}, available {available}")]
    SoldOut { requested: i32, available: i32 },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transfer order and claim errors
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Order not found")]
    NotFound,
    #[error("Order already claimed by another driver")]
    AlreadyClaimed,
    #[error("Driver not found")]
    DriverNotFound,
    #[error("Driver is not active")]
    DriverInactive,
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Driver administration errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Driver not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Balance ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Ledger entry not found")]
    NotFound,
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
