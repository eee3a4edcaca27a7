//! Error types for the entity model

use crate::entity::EntityKind;
use thiserror::Error;

/// Result type for entity model operations
pub type EntityResult<T> = Result<T, EntityError>;

/// Errors raised while handling entities
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityError {
    /// A type-erased entity held a different kind than requested
    #[error("Expected a {expected}, found a {found}")]
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    /// Entity failed validation
    #[error("Invalid {kind}: {}", .reasons.join("; "))]
    Invalid {
        kind: EntityKind,
        reasons: Vec<String>,
    },
}
