// crates/sync-engine/src/replay.rs
//! Remote client replaying a recorded account
//!
//! [`ReplayRemote`] answers from a [`RemoteFixture`] (sync state, chunk
//! sequence, full notes and linked notebooks), records every call it
//! receives and can be told to fail a given call.

use crate::error::SyncResult;
use crate::protocol::{RemoteFailure, RemoteResult, RemoteSyncClient};
use log::debug;
use notesync_core::{LinkedNotebook, Note, SyncChunk, SyncChunkFilter, SyncState, Usn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Recorded delta feed of one linked notebook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedNotebookFixture {
    pub sync_state: SyncState,
    pub chunks: Vec<SyncChunk>,
}

/// Recorded remote account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteFixture {
    pub sync_state: SyncState,
    pub chunks: Vec<SyncChunk>,
    /// Full notes served by `get_full_note`; chunk notes are the fallback
    pub notes: Vec<Note>,
    /// Keyed by linked notebook guid
    pub linked_notebooks: BTreeMap<String, LinkedNotebookFixture>,
}

impl RemoteFixture {
    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Kind of remote call, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCallKind {
    AccountSyncState,
    SyncChunk,
    FullNote,
    LinkedNotebookSyncState,
    LinkedNotebookSyncChunk,
}

/// One call received by the replay client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    AccountSyncState,
    SyncChunk {
        after_usn: Usn,
        max_entries: u32,
    },
    FullNote {
        guid: String,
    },
    LinkedNotebookSyncState {
        guid: String,
    },
    LinkedNotebookSyncChunk {
        guid: String,
        after_usn: Usn,
        full_sync_only: bool,
    },
}

impl RemoteCall {
    pub fn kind(&self) -> RemoteCallKind {
        match self {
            RemoteCall::AccountSyncState => RemoteCallKind::AccountSyncState,
            RemoteCall::SyncChunk { .. } => RemoteCallKind::SyncChunk,
            RemoteCall::FullNote { .. } => RemoteCallKind::FullNote,
            RemoteCall::LinkedNotebookSyncState { .. } => RemoteCallKind::LinkedNotebookSyncState,
            RemoteCall::LinkedNotebookSyncChunk { .. } => RemoteCallKind::LinkedNotebookSyncChunk,
        }
    }
}

/// Remote client backed by a fixture
#[derive(Debug, Default)]
pub struct ReplayRemote {
    fixture: RemoteFixture,
    calls: Vec<RemoteCall>,
    counts: HashMap<RemoteCallKind, usize>,
    failures: HashMap<(RemoteCallKind, usize), RemoteFailure>,
    rejected_tokens: HashSet<String>,
}

impl ReplayRemote {
    pub fn new(fixture: RemoteFixture) -> Self {
        Self {
            fixture,
            ..Self::default()
        }
    }

    pub fn fixture(&self) -> &RemoteFixture {
        &self.fixture
    }

    /// Replaces the served account, keeping the call log
    pub fn set_fixture(&mut self, fixture: RemoteFixture) {
        self.fixture = fixture;
    }

    /// Fails the `index`-th call (zero based) of the given kind
    pub fn fail_on(&mut self, kind: RemoteCallKind, index: usize, failure: RemoteFailure) {
        self.failures.insert((kind, index), failure);
    }

    /// Answers calls made with this token as expired
    pub fn reject_token(&mut self, token: impl Into<String>) {
        self.rejected_tokens.insert(token.into());
    }

    pub fn calls(&self) -> &[RemoteCall] {
        &self.calls
    }

    /// Calls of one kind, in order
    pub fn calls_of(&self, kind: RemoteCallKind) -> Vec<&RemoteCall> {
        self.calls.iter().filter(|call| call.kind() == kind).collect()
    }

    fn record(&mut self, call: RemoteCall) -> RemoteResult<()> {
        let kind = call.kind();
        let index = self.counts.entry(kind).or_insert(0);
        let current = *index;
        *index += 1;

        debug!("Remote call {:?}", call);
        self.calls.push(call);
        match self.failures.remove(&(kind, current)) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn check_token(&self, token: &str) -> RemoteResult<()> {
        if token.is_empty() || self.rejected_tokens.contains(token) {
            return Err(RemoteFailure::AuthExpired);
        }
        Ok(())
    }

    fn linked(&self, linked_notebook: &LinkedNotebook) -> RemoteResult<&LinkedNotebookFixture> {
        let guid = linked_notebook.guid.as_deref().unwrap_or_default();
        self.fixture
            .linked_notebooks
            .get(guid)
            .ok_or_else(|| RemoteFailure::Failed(format!("unknown linked notebook {}", guid)))
    }
}

/// First chunk past `after_usn`, or an empty final chunk
fn next_chunk(chunks: &[SyncChunk], state: &SyncState, after_usn: Usn) -> SyncChunk {
    chunks
        .iter()
        .find(|chunk| chunk.high_usn.is_some_and(|high| high > after_usn))
        .cloned()
        .unwrap_or_else(|| SyncChunk {
            high_usn: None,
            update_count: chunks
                .iter()
                .map(|chunk| chunk.update_count)
                .max()
                .unwrap_or(state.update_count)
                .max(state.update_count),
            current_time: state.current_time,
            ..SyncChunk::default()
        })
}

fn apply_filter(mut chunk: SyncChunk, filter: &SyncChunkFilter) -> SyncChunk {
    if !filter.include_expunged {
        chunk.expunged_tags.clear();
        chunk.expunged_notebooks.clear();
        chunk.expunged_searches.clear();
        chunk.expunged_notes.clear();
        chunk.expunged_linked_notebooks.clear();
    }
    if !filter.include_resources {
        chunk.resources.clear();
    }
    if !filter.include_notes {
        chunk.notes.clear();
    }
    if !filter.include_note_resources {
        for note in &mut chunk.notes {
            note.resources.clear();
        }
    }
    if !filter.include_tags {
        chunk.tags.clear();
    }
    if !filter.include_notebooks {
        chunk.notebooks.clear();
    }
    if !filter.include_searches {
        chunk.searches.clear();
    }
    if !filter.include_linked_notebooks {
        chunk.linked_notebooks.clear();
    }
    chunk
}

impl RemoteSyncClient for ReplayRemote {
    fn get_account_sync_state(&mut self) -> RemoteResult<SyncState> {
        self.record(RemoteCall::AccountSyncState)?;
        Ok(self.fixture.sync_state)
    }

    fn get_sync_chunk(
        &mut self,
        after_usn: Usn,
        max_entries: u32,
        filter: &SyncChunkFilter,
    ) -> RemoteResult<SyncChunk> {
        self.record(RemoteCall::SyncChunk {
            after_usn,
            max_entries,
        })?;
        let chunk = next_chunk(&self.fixture.chunks, &self.fixture.sync_state, after_usn);
        Ok(apply_filter(chunk, filter))
    }

    fn get_full_note(&mut self, guid: &str, with_resource_data: bool) -> RemoteResult<Note> {
        self.record(RemoteCall::FullNote {
            guid: guid.to_string(),
        })?;

        let from_chunks = || {
            self.fixture
                .chunks
                .iter()
                .flat_map(|chunk| chunk.notes.iter())
                .chain(
                    self.fixture
                        .linked_notebooks
                        .values()
                        .flat_map(|linked| linked.chunks.iter())
                        .flat_map(|chunk| chunk.notes.iter()),
                )
                .filter(|note| note.guid.as_deref() == Some(guid))
                .max_by_key(|note| note.usn)
        };
        let mut note = self
            .fixture
            .notes
            .iter()
            .find(|note| note.guid.as_deref() == Some(guid))
            .or_else(from_chunks)
            .cloned()
            .ok_or_else(|| RemoteFailure::Failed(format!("note {} not found", guid)))?;

        if !with_resource_data {
            for resource in &mut note.resources {
                resource.data = None;
                resource.recognition_data = None;
                resource.alternate_data = None;
            }
        }
        Ok(note)
    }

    fn get_linked_notebook_sync_state(
        &mut self,
        linked_notebook: &LinkedNotebook,
        auth_token: &str,
    ) -> RemoteResult<SyncState> {
        self.record(RemoteCall::LinkedNotebookSyncState {
            guid: linked_notebook.guid.clone().unwrap_or_default(),
        })?;
        self.check_token(auth_token)?;
        Ok(self.linked(linked_notebook)?.sync_state)
    }

    fn get_linked_notebook_sync_chunk(
        &mut self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        _max_entries: u32,
        auth_token: &str,
        full_sync_only: bool,
    ) -> RemoteResult<SyncChunk> {
        self.record(RemoteCall::LinkedNotebookSyncChunk {
            guid: linked_notebook.guid.clone().unwrap_or_default(),
            after_usn,
            full_sync_only,
        })?;
        self.check_token(auth_token)?;

        let linked = self.linked(linked_notebook)?;
        let chunk = next_chunk(&linked.chunks, &linked.sync_state, after_usn);
        let filter = if full_sync_only {
            SyncChunkFilter::full(false)
        } else {
            SyncChunkFilter::incremental()
        };
        Ok(apply_filter(chunk, &filter))
    }
}
