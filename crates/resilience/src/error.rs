// crates/resilience/src/error.rs
//! Error types for resilience operations

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    /// A rate-limit response carried a wait duration that is not positive
    #[error("Rate limit wait duration must be positive, got {0} seconds")]
    NonPositiveDelay(i64),

    /// A rate-limit wait ends beyond the representable time range
    #[error("Rate limit wait of {0} seconds is out of range")]
    DelayOutOfRange(i64),

    /// No deferred operation is registered under the token
    #[error("Unknown deferred operation token: {0}")]
    UnknownToken(u64),

    /// Operation was cancelled
    #[error("Operation was cancelled")]
    Cancelled,
}
