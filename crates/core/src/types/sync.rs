//! Delta-sync protocol value objects

use crate::types::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag, Timestamp, Usn};
use serde::{Deserialize, Serialize};

/// One bounded page of the remote delta feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncChunk {
    /// Highest USN among the items in this chunk; absent when the chunk is empty
    pub high_usn: Option<Usn>,
    /// Server's total update count at fetch time
    pub update_count: i64,
    pub current_time: Timestamp,
    pub tags: Vec<Tag>,
    pub notebooks: Vec<Notebook>,
    pub searches: Vec<SavedSearch>,
    pub notes: Vec<Note>,
    pub resources: Vec<Resource>,
    pub linked_notebooks: Vec<LinkedNotebook>,
    pub expunged_tags: Vec<String>,
    pub expunged_notebooks: Vec<String>,
    pub expunged_searches: Vec<String>,
    pub expunged_notes: Vec<String>,
    pub expunged_linked_notebooks: Vec<String>,
}

impl SyncChunk {
    /// Creates an empty chunk positioned at `high_usn` out of `update_count`
    pub fn new(high_usn: Usn, update_count: i64) -> Self {
        Self {
            high_usn: Some(high_usn),
            update_count,
            ..Self::default()
        }
    }

    /// Returns true if no further chunk has to be requested after this one
    pub fn is_last(&self) -> bool {
        match self.high_usn {
            Some(high_usn) => high_usn >= self.update_count,
            None => true,
        }
    }

    /// Number of changed items carried by the chunk
    pub fn item_count(&self) -> usize {
        self.tags.len()
            + self.notebooks.len()
            + self.searches.len()
            + self.notes.len()
            + self.resources.len()
            + self.linked_notebooks.len()
    }
}

/// Server-side synchronization state of an account or linked notebook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub update_count: i64,
    pub full_sync_before: Timestamp,
    pub current_time: Timestamp,
}

impl SyncState {
    pub fn new(update_count: i64, full_sync_before: Timestamp) -> Self {
        Self {
            update_count,
            full_sync_before,
            current_time: Timestamp::now(),
        }
    }
}

/// Selects which sections of the delta feed the server returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChunkFilter {
    pub include_notes: bool,
    pub include_notebooks: bool,
    pub include_tags: bool,
    pub include_searches: bool,
    pub include_linked_notebooks: bool,
    pub include_note_resources: bool,
    pub include_resources: bool,
    pub include_expunged: bool,
}

impl SyncChunkFilter {
    /// Filter for a full sync; a fresh replica has nothing to expunge
    pub fn full(include_resources: bool) -> Self {
        Self {
            include_resources,
            include_expunged: false,
            ..Self::incremental()
        }
    }

    /// Filter for an incremental sync
    pub fn incremental() -> Self {
        Self {
            include_notes: true,
            include_notebooks: true,
            include_tags: true,
            include_searches: true,
            include_linked_notebooks: true,
            include_note_resources: true,
            include_resources: true,
            include_expunged: true,
        }
    }
}
