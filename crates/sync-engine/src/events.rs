// crates/sync-engine/src/events.rs
//! Messages exchanged between the engine and its host

use crate::storage::{StorageRequest, StorageResponse};
use crate::types::{SyncBookmarks, SyncPhase};
use chrono::{DateTime, Utc};
use notesync_core::{LinkedNotebookAuth, Timestamp, Usn};
use notesync_resilience::{Deferred, TimerToken};
use std::collections::{BTreeMap, HashMap};

/// Linked notebook that needs a fresh authentication token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub guid: String,
    pub share_key: String,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub last_update_count: i64,
    pub last_sync_time: Timestamp,
    pub linked_notebook_update_counts: BTreeMap<String, i64>,
    pub linked_notebook_sync_times: BTreeMap<String, Timestamp>,
    /// Complete bookmark set to persist
    pub bookmarks: SyncBookmarks,
}

/// Notification emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Progress {
        phase: SyncPhase,
        fraction: f64,
    },
    SyncChunksDownloadProgress {
        highest_downloaded_usn: Usn,
        highest_server_usn: Usn,
        last_previous_usn: Usn,
    },
    LinkedNotebookChunksDownloadProgress {
        linked_notebook_guid: String,
        highest_downloaded_usn: Usn,
        highest_server_usn: Usn,
        last_previous_usn: Usn,
    },
    SyncChunksDownloaded,
    LinkedNotebookChunksDownloaded,
    NotesDownloadProgress {
        downloaded: usize,
        total: usize,
    },
    RateLimitExceeded {
        seconds: u64,
        resume_at: DateTime<Utc>,
    },
    AuthenticationExpired,
    LastSyncParametersRequested,
    LinkedNotebookAuthTokensRequested(Vec<TokenRequest>),
    Paused {
        pending_authentication: bool,
    },
    Stopped,
    Finished(SyncSummary),
    Failure(String),
}

impl SyncEvent {
    /// Returns true if the run is over after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncEvent::Finished(_) | SyncEvent::Failure(_) | SyncEvent::Stopped
        )
    }
}

/// Command issued by the host
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    Start { after_usn: Usn },
    Stop,
    Pause,
    Resume,
    SetLastSyncParameters(SyncBookmarks),
    LinkedNotebookAuthTokens(HashMap<String, LinkedNotebookAuth>),
    AuthenticationRefreshed,
}

/// Anything that can wake the engine up
#[derive(Debug, Clone, PartialEq)]
pub enum SyncInput {
    Command(SyncCommand),
    Storage(StorageResponse),
    Timer(TimerToken),
}

/// Work produced by the engine since the last drain
#[derive(Debug, Default)]
pub struct Outbox {
    pub requests: Vec<StorageRequest>,
    pub timers: Vec<Deferred>,
    pub events: Vec<SyncEvent>,
}

impl Outbox {
    /// Returns true if there is nothing to route
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.timers.is_empty() && self.events.is_empty()
    }
}
