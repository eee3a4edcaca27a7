// crates/sync-engine/src/tracker.rs
//! Pending-request ledger
//!
//! Tracks every storage request in flight, grouped by entity kind and
//! operation kind, together with the context needed to continue once the
//! response arrives. Phase advancement asks the ledger whether anything is
//! still outstanding for the kinds the phase owns.

use crate::types::{OperationKind, RequestId};
use notesync_core::EntityKind;
use std::collections::{HashMap, HashSet};

/// One request in flight
#[derive(Debug)]
pub(crate) struct Pending<C> {
    pub kind: EntityKind,
    pub operation: OperationKind,
    pub context: C,
}

/// In-flight requests and reconciliation claims
#[derive(Debug)]
pub(crate) struct RequestTracker<C> {
    pending: HashMap<RequestId, Pending<C>>,
    by_key: HashMap<(EntityKind, OperationKind), HashSet<RequestId>>,
    claims: HashSet<(EntityKind, String)>,
}

impl<C> RequestTracker<C> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            by_key: HashMap::new(),
            claims: HashSet::new(),
        }
    }

    /// Records a new request and returns its correlation id
    pub fn register(&mut self, kind: EntityKind, operation: OperationKind, context: C) -> RequestId {
        let id = RequestId::new();
        self.by_key.entry((kind, operation)).or_default().insert(id);
        self.pending.insert(
            id,
            Pending {
                kind,
                operation,
                context,
            },
        );
        id
    }

    /// Removes a request once its response arrived
    ///
    /// Returns `None` for ids this ledger never issued.
    pub fn complete(&mut self, id: RequestId) -> Option<Pending<C>> {
        let pending = self.pending.remove(&id)?;
        if let Some(ids) = self.by_key.get_mut(&(pending.kind, pending.operation)) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_key.remove(&(pending.kind, pending.operation));
            }
        }
        Some(pending)
    }

    /// Number of requests in flight for a kind and operation
    pub fn pending_count(&self, kind: EntityKind, operation: OperationKind) -> usize {
        self.by_key
            .get(&(kind, operation))
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Returns true if any request of this operation kind is in flight
    pub fn has_operation(&self, operation: OperationKind) -> bool {
        self.by_key.keys().any(|(_, op)| *op == operation)
    }

    /// Returns true if no request for any of the kinds is in flight
    pub fn is_settled(&self, kinds: &[EntityKind]) -> bool {
        !self.by_key.keys().any(|(kind, _)| kinds.contains(kind))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Marks a remote item as being reconciled
    ///
    /// Returns false if the same item is already in flight.
    pub fn claim(&mut self, kind: EntityKind, guid: &str) -> bool {
        self.claims.insert((kind, guid.to_string()))
    }

    /// Ends the reconciliation of a remote item
    pub fn release(&mut self, kind: EntityKind, guid: &str) {
        self.claims.remove(&(kind, guid.to_string()));
    }

    pub fn is_claimed(&self, kind: EntityKind, guid: &str) -> bool {
        self.claims.contains(&(kind, guid.to_string()))
    }

    /// Number of items being reconciled
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Forgets every request and claim
    pub fn clear(&mut self) {
        self.pending.clear();
        self.by_key.clear();
        self.claims.clear();
    }
}

impl<C> Default for RequestTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_complete() {
        let mut tracker = RequestTracker::new();
        let id = tracker.register(EntityKind::Tag, OperationKind::FindByGuid, "tag g1");

        assert_eq!(tracker.pending_count(EntityKind::Tag, OperationKind::FindByGuid), 1);
        assert!(!tracker.is_settled(&[EntityKind::Tag]));
        assert!(tracker.is_settled(&[EntityKind::Note]));

        let pending = tracker.complete(id).unwrap();
        assert_eq!(pending.context, "tag g1");
        assert_eq!(pending.operation, OperationKind::FindByGuid);
        assert!(tracker.is_empty());
        assert!(tracker.is_settled(&[EntityKind::Tag]));
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let mut tracker: RequestTracker<()> = RequestTracker::new();
        assert!(tracker.complete(RequestId::new()).is_none());
    }

    #[test]
    fn test_complete_twice() {
        let mut tracker = RequestTracker::new();
        let id = tracker.register(EntityKind::Note, OperationKind::Add, ());
        assert!(tracker.complete(id).is_some());
        assert!(tracker.complete(id).is_none());
    }

    #[test]
    fn test_completion_order_is_free() {
        let mut tracker = RequestTracker::new();
        let a = tracker.register(EntityKind::Notebook, OperationKind::Add, 1);
        let b = tracker.register(EntityKind::Notebook, OperationKind::Add, 2);
        let c = tracker.register(EntityKind::Notebook, OperationKind::Update, 3);

        tracker.complete(c);
        tracker.complete(a);
        assert_eq!(tracker.pending_count(EntityKind::Notebook, OperationKind::Add), 1);
        assert!(tracker.has_operation(OperationKind::Add));
        assert!(!tracker.has_operation(OperationKind::Update));

        tracker.complete(b);
        assert!(tracker.is_settled(&[EntityKind::Notebook]));
    }

    #[test]
    fn test_claims() {
        let mut tracker: RequestTracker<()> = RequestTracker::new();
        assert!(tracker.claim(EntityKind::Note, "n1"));
        assert!(!tracker.claim(EntityKind::Note, "n1"));
        assert!(tracker.claim(EntityKind::Resource, "n1"));
        assert!(tracker.is_claimed(EntityKind::Note, "n1"));

        tracker.release(EntityKind::Note, "n1");
        assert!(!tracker.is_claimed(EntityKind::Note, "n1"));
        assert_eq!(tracker.claim_count(), 1);

        tracker.clear();
        assert_eq!(tracker.claim_count(), 0);
    }
}
