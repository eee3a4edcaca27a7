// crates/sync-engine/src/error.rs
//! Error types for sync operations
//!
//! Every error surfaced here is fatal to the current run. Rate limiting and
//! expired authentication are handled as control flow and never reach this
//! type, except when the remote side reports a malformed rate limit.

use notesync_core::{EntityError, EntityKind};
use notesync_resilience::ResilienceError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote item arrived without a required update sequence number
    #[error("Remote {kind} {guid} has no update sequence number")]
    MissingUsn { kind: EntityKind, guid: String },

    /// Remote item arrived without a guid
    #[error("Remote {0} has no guid")]
    MissingGuid(EntityKind),

    /// Item is missing the guid of the entity that owns it
    #[error("{kind} {guid} has no {owner} guid")]
    MissingOwner {
        kind: EntityKind,
        guid: String,
        owner: EntityKind,
    },

    /// Owning entity could not be found in local storage
    #[error("Could not find {owner} {owner_guid} required by {kind} {guid}")]
    OwnerNotFound {
        kind: EntityKind,
        guid: String,
        owner: EntityKind,
        owner_guid: String,
    },

    /// Invalid sync data
    #[error("Invalid sync data: {0}")]
    InvalidData(String),

    /// Buffered state for an in-flight operation is missing
    #[error("Missing pending operation context: {0}")]
    MissingContext(String),

    /// Local storage rejected a mutation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote service reported a failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// Linked notebook credentials are unusable
    #[error("Linked notebook auth error: {0}")]
    LinkedNotebookAuth(String),

    /// Entity conversion failed
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Rate limit bookkeeping failed
    #[error("Rate limit error: {0}")]
    Resilience(#[from] ResilienceError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background worker failed
    #[error("Sync worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_usn_display() {
        let err = SyncError::MissingUsn {
            kind: EntityKind::Tag,
            guid: "g1".to_string(),
        };
        assert_eq!(err.to_string(), "Remote tag g1 has no update sequence number");
    }

    #[test]
    fn test_owner_not_found_display() {
        let err = SyncError::OwnerNotFound {
            kind: EntityKind::Resource,
            guid: "r1".to_string(),
            owner: EntityKind::Note,
            owner_guid: "n1".to_string(),
        };
        assert!(err.to_string().contains("Could not find note n1"));
    }

    #[test]
    fn test_resilience_error_converts() {
        let err: SyncError = ResilienceError::NonPositiveDelay(0).into();
        assert!(err.to_string().starts_with("Rate limit error"));
    }
}
