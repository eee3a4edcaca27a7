// crates/sync-engine/src/conflict.rs
//! Merge decisions between a remote item and its local duplicate

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, SecondsFormat, Utc};
use notesync_core::{Entity, EntityKind, HasName, LocalId, Note};

/// What to do with a remote item that has a local duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeDecision {
    /// Local copy is at least as recent as the remote one
    KeepLocal,
    /// Overwrite the local copy with the remote content
    AcceptRemote,
    /// Local copy was modified; keep it as a renamed clone
    Conflict,
}

/// Compares a remote item with its local duplicate
///
/// A remote item must carry a USN. A local item without one has never been
/// synced and is treated as older than any remote version. Linked notebooks
/// are never cloned: the remote copy wins.
pub(crate) fn decide<T: Entity>(remote: &T, local: &T) -> SyncResult<MergeDecision> {
    let remote_usn = remote.usn().ok_or_else(|| SyncError::MissingUsn {
        kind: T::KIND,
        guid: remote.guid().unwrap_or_default().to_string(),
    })?;

    if let Some(local_usn) = local.usn() {
        if local_usn >= remote_usn {
            return Ok(MergeDecision::KeepLocal);
        }
    }

    if local.is_dirty() && T::KIND != EntityKind::LinkedNotebook {
        Ok(MergeDecision::Conflict)
    } else {
        Ok(MergeDecision::AcceptRemote)
    }
}

/// Takes the remote content over the identity of the local copy
pub(crate) fn accept_remote<T: Entity>(mut remote: T, local: &T) -> T {
    remote.set_local_id(local.local_id());
    remote.set_dirty(false);
    remote.set_local(false);
    remote
}

/// Turns a copy of the local item into a new, local-only item
pub(crate) fn detach<T: Entity + HasName>(local: &T, name: String) -> T {
    let mut clone = local.clone();
    clone.set_local_id(LocalId::new());
    clone.set_guid(None);
    clone.set_usn(None);
    clone.set_dirty(true);
    clone.set_local(true);
    clone.set_name(name);
    clone
}

/// Clones a local note together with its resources as local-only items
pub(crate) fn detach_note(local: &Note, title: String) -> Note {
    let mut clone = detach(local, title);
    let note_local_id = clone.local_id;
    for resource in &mut clone.resources {
        resource.local_id = LocalId::new();
        resource.guid = None;
        resource.usn = None;
        resource.note_guid = None;
        resource.note_local_id = Some(note_local_id);
        resource.dirty = true;
        resource.local = true;
    }
    clone
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Name of the clone created for a conflicting item
pub(crate) fn conflict_name(kind: EntityKind, name: Option<&str>, at: DateTime<Utc>) -> String {
    format!(
        "Conflicted {} {} ({})",
        kind,
        name.unwrap_or("untitled"),
        timestamp(at)
    )
}

/// Name of the note cloned because one of its resources conflicted
pub(crate) fn resource_conflict_note_name(title: Option<&str>, at: DateTime<Utc>) -> String {
    format!(
        "Note \"{}\" containing conflicted resource ({})",
        title.unwrap_or("untitled"),
        timestamp(at)
    )
}
