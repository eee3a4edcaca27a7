// crates/sync-engine/src/storage.rs
//! Local storage contract
//!
//! Storage is asynchronous: the engine emits [`StorageRequest`]s and later
//! receives one [`StorageResponse`] per request, correlated by [`RequestId`].
//! Responses for distinct requests may arrive in any order.

use crate::events::SyncInput;
use crate::types::{OperationKind, RequestId};
use notesync_core::{AnyEntity, EntityKind, LinkedNotebook};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Operation requested from local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageOp {
    FindByGuid {
        kind: EntityKind,
        guid: String,
    },
    /// Case-insensitive lookup, scoped to a linked notebook when one is given
    FindByName {
        kind: EntityKind,
        name: String,
        linked_notebook_guid: Option<String>,
    },
    Add(AnyEntity),
    Update(AnyEntity),
    Expunge {
        kind: EntityKind,
        guid: String,
    },
    ListLinkedNotebooks {
        limit: u32,
        offset: u32,
    },
    ExpungeNotelessTagsInLinkedNotebooks,
}

impl StorageOp {
    /// Entity kind the operation is about
    pub fn kind(&self) -> EntityKind {
        match self {
            StorageOp::FindByGuid { kind, .. }
            | StorageOp::FindByName { kind, .. }
            | StorageOp::Expunge { kind, .. } => *kind,
            StorageOp::Add(entity) | StorageOp::Update(entity) => entity.kind(),
            StorageOp::ListLinkedNotebooks { .. } => EntityKind::LinkedNotebook,
            StorageOp::ExpungeNotelessTagsInLinkedNotebooks => EntityKind::Tag,
        }
    }

    /// Operation kind used for ledger bookkeeping
    pub fn operation(&self) -> OperationKind {
        match self {
            StorageOp::FindByGuid { .. } => OperationKind::FindByGuid,
            StorageOp::FindByName { .. } => OperationKind::FindByName,
            StorageOp::Add(_) => OperationKind::Add,
            StorageOp::Update(_) => OperationKind::Update,
            StorageOp::Expunge { .. } => OperationKind::Expunge,
            StorageOp::ListLinkedNotebooks { .. } => OperationKind::ListAll,
            StorageOp::ExpungeNotelessTagsInLinkedNotebooks => OperationKind::ExpungeNotelessTags,
        }
    }
}

/// Request sent to local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub id: RequestId,
    pub op: StorageOp,
}

/// Successful outcome of a storage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoragePayload {
    /// Result of a find
    Found(AnyEntity),
    /// Entity as stored by an add or update
    Stored(AnyEntity),
    Expunged,
    LinkedNotebooks(Vec<LinkedNotebook>),
    NotelessTagsExpunged,
}

/// Failed outcome of a storage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageFailure {
    pub request: StorageOp,
    pub description: String,
}

/// Response from local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    pub id: RequestId,
    pub result: Result<StoragePayload, StorageFailure>,
}

impl StorageResponse {
    /// Creates a successful response
    pub fn success(id: RequestId, payload: StoragePayload) -> Self {
        Self {
            id,
            result: Ok(payload),
        }
    }

    /// Creates a failed response
    pub fn failure(id: RequestId, request: StorageOp, description: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(StorageFailure {
                request,
                description: description.into(),
            }),
        }
    }
}

/// Sends storage responses back to a running engine
#[derive(Debug, Clone)]
pub struct StorageResponder {
    inputs: UnboundedSender<SyncInput>,
}

impl StorageResponder {
    pub(crate) fn new(inputs: UnboundedSender<SyncInput>) -> Self {
        Self { inputs }
    }

    /// Delivers a response; returns false if the engine is gone
    pub fn respond(&self, response: StorageResponse) -> bool {
        self.inputs.send(SyncInput::Storage(response)).is_ok()
    }
}

/// Local storage as seen by the runner
///
/// Implementations may answer immediately or from another task, but must
/// answer every request exactly once.
pub trait LocalStorageService: Send + 'static {
    fn submit(&mut self, request: StorageRequest, responder: StorageResponder);
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_core::Tag;

    #[test]
    fn test_op_kind_and_operation() {
        let op = StorageOp::Add(Tag::new("t").into());
        assert_eq!(op.kind(), EntityKind::Tag);
        assert_eq!(op.operation(), OperationKind::Add);

        let list = StorageOp::ListLinkedNotebooks {
            limit: 10,
            offset: 0,
        };
        assert_eq!(list.kind(), EntityKind::LinkedNotebook);
        assert_eq!(list.operation(), OperationKind::ListAll);
    }

    #[test]
    fn test_failure_keeps_request() {
        let op = StorageOp::Expunge {
            kind: EntityKind::Note,
            guid: "n1".to_string(),
        };
        let response = StorageResponse::failure(RequestId::new(), op.clone(), "disk full");
        let failure = response.result.unwrap_err();
        assert_eq!(failure.request, op);
        assert_eq!(failure.description, "disk full");
    }

    #[test]
    fn test_responder_delivers_input() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let responder = StorageResponder::new(tx);
        let id = RequestId::new();

        assert!(responder.respond(StorageResponse::success(id, StoragePayload::Expunged)));
        match rx.try_recv().unwrap() {
            SyncInput::Storage(response) => assert_eq!(response.id, id),
            other => panic!("unexpected input {:?}", other),
        }
    }
}
