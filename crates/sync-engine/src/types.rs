// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use notesync_core::{Timestamp, Usn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Correlation identifier of one local storage request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of local storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    FindByGuid,
    FindByName,
    Add,
    Update,
    Expunge,
    ListAll,
    ExpungeNotelessTags,
}

/// Whether the run downloads everything or only changes since a bookmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Phases of a synchronization run, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    CheckingOwnAccountSyncState,
    DownloadingOwnAccountChunks,
    SyncingOwnAccountContainers,
    SyncingNotes,
    SyncingResources,
    ExpungingOwnAccountDeletions,
    ListingAllLinkedNotebooks,
    RefreshingLinkedNotebookAuthTokens,
    CheckingLinkedNotebooksState,
    DownloadingLinkedNotebookChunks,
    SyncingLinkedNotebookContainers,
    SyncingLinkedNotebookNotes,
    ExpungingLinkedNotebookDeletions,
    ExpungingNotelessLinkedTags,
    Finished,
}

impl SyncPhase {
    const COUNT: usize = 16;

    /// Position in the pipeline, starting at zero
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Rough share of the run completed once this phase is entered
    pub fn fraction(&self) -> f64 {
        self.index() as f64 / (Self::COUNT - 1) as f64
    }

    /// Human readable description reported with progress
    pub fn description(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "Idle",
            SyncPhase::CheckingOwnAccountSyncState => "Checking account sync state",
            SyncPhase::DownloadingOwnAccountChunks => "Downloading sync chunks",
            SyncPhase::SyncingOwnAccountContainers => {
                "Syncing saved searches, linked notebooks, tags and notebooks"
            }
            SyncPhase::SyncingNotes => "Syncing notes",
            SyncPhase::SyncingResources => "Syncing resources",
            SyncPhase::ExpungingOwnAccountDeletions => "Expunging deleted items",
            SyncPhase::ListingAllLinkedNotebooks => "Listing linked notebooks",
            SyncPhase::RefreshingLinkedNotebookAuthTokens => {
                "Refreshing linked notebook authentication tokens"
            }
            SyncPhase::CheckingLinkedNotebooksState => "Checking linked notebooks sync state",
            SyncPhase::DownloadingLinkedNotebookChunks => "Downloading linked notebook sync chunks",
            SyncPhase::SyncingLinkedNotebookContainers => "Syncing linked notebook tags and notebooks",
            SyncPhase::SyncingLinkedNotebookNotes => "Syncing linked notebook notes",
            SyncPhase::ExpungingLinkedNotebookDeletions => {
                "Expunging items deleted from linked notebooks"
            }
            SyncPhase::ExpungingNotelessLinkedTags => "Expunging linked notebook tags without notes",
            SyncPhase::Finished => "Finished",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Persisted position of one linked notebook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedNotebookBookmark {
    pub last_update_count: i64,
    pub last_sync_time: Timestamp,
    pub last_synchronized_usn: Usn,
}

/// Parameters persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncBookmarks {
    pub last_update_count: i64,
    pub last_sync_time: Timestamp,
    /// Keyed by linked notebook guid
    pub linked_notebooks: BTreeMap<String, LinkedNotebookBookmark>,
}

impl SyncBookmarks {
    /// Returns true once at least one run has completed
    pub fn has_synced_before(&self) -> bool {
        self.last_update_count > 0 && self.last_sync_time.as_millis() > 0
    }

    /// Gets the bookmark of a linked notebook
    pub fn linked_notebook(&self, guid: &str) -> Option<&LinkedNotebookBookmark> {
        self.linked_notebooks.get(guid)
    }
}

/// Tunables of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on entries per requested chunk
    pub max_sync_chunk_entries: u32,
    /// Page size used when listing linked notebooks from local storage
    pub linked_notebook_page_size: u32,
    /// Cached tokens expiring sooner than this are requested again
    pub auth_token_min_validity_secs: i64,
    /// Requests resources during a full sync
    pub full_sync_include_resources: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sync_chunk_entries: 50,
            linked_notebook_page_size: 50,
            auth_token_min_validity_secs: 6 * 60 * 60,
            full_sync_include_resources: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_phase_order() {
        assert!(SyncPhase::SyncingOwnAccountContainers < SyncPhase::SyncingNotes);
        assert!(SyncPhase::SyncingNotes < SyncPhase::SyncingResources);
        assert!(SyncPhase::ExpungingOwnAccountDeletions < SyncPhase::ListingAllLinkedNotebooks);
        assert_eq!(SyncPhase::Finished.index(), SyncPhase::COUNT - 1);
    }

    #[test]
    fn test_phase_fraction_bounds() {
        assert_eq!(SyncPhase::Idle.fraction(), 0.0);
        assert_eq!(SyncPhase::Finished.fraction(), 1.0);
    }

    #[test]
    fn test_bookmarks_first_sync() {
        let mut bookmarks = SyncBookmarks::default();
        assert!(!bookmarks.has_synced_before());

        bookmarks.last_update_count = 10;
        bookmarks.last_sync_time = Timestamp::from_millis(1_000);
        assert!(bookmarks.has_synced_before());
    }

    #[test]
    fn test_bookmarks_json() {
        let mut bookmarks = SyncBookmarks::default();
        bookmarks.linked_notebooks.insert(
            "ln-1".to_string(),
            LinkedNotebookBookmark {
                last_update_count: 4,
                last_sync_time: Timestamp::from_millis(9),
                last_synchronized_usn: 4,
            },
        );

        let json = serde_json::to_string(&bookmarks).unwrap();
        let parsed: SyncBookmarks = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bookmarks);
        assert_eq!(parsed.linked_notebook("ln-1").unwrap().last_synchronized_usn, 4);
    }
}
