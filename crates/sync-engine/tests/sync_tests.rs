// crates/sync-engine/tests/sync_tests.rs
//! Integration tests for the sync engine

use notesync_core::{
    EntityKind, LinkedNotebook, LinkedNotebookAuth, Note, Notebook, Resource, SyncChunk,
    SyncState, Tag, Timestamp,
};
use notesync_resilience::Deferred;
use notesync_sync_engine::{
    EngineConfig, LinkedNotebookFixture, MemoryStorage, RemoteCall, RemoteCallKind,
    RemoteFailure, RemoteFixture, ReplayRemote, StorageOp, StorageRequest, SyncBookmarks,
    SyncEngine, SyncEvent, SyncPhase, SyncSummary, TokenRequest,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Drives an engine against in-memory storage, answering requests in order
struct Harness {
    engine: SyncEngine<ReplayRemote>,
    storage: MemoryStorage,
    queue: VecDeque<StorageRequest>,
    events: Vec<SyncEvent>,
    ops: Vec<StorageOp>,
    timers: Vec<Deferred>,
}

impl Harness {
    fn new(fixture: RemoteFixture) -> Self {
        Self::with_storage(fixture, MemoryStorage::new())
    }

    fn with_storage(fixture: RemoteFixture, storage: MemoryStorage) -> Self {
        Self {
            engine: SyncEngine::new(EngineConfig::default(), ReplayRemote::new(fixture)),
            storage,
            queue: VecDeque::new(),
            events: Vec::new(),
            ops: Vec::new(),
            timers: Vec::new(),
        }
    }

    fn with_bookmarks(mut self, bookmarks: SyncBookmarks) -> Self {
        self.engine.set_last_sync_parameters(bookmarks);
        self.collect();
        self
    }

    fn collect(&mut self) {
        let outbox = self.engine.take_outbox();
        self.queue.extend(outbox.requests);
        self.events.extend(outbox.events);
        self.timers.extend(outbox.timers);
    }

    fn start(&mut self, after_usn: i64) {
        self.engine.start(after_usn);
        self.collect();
    }

    fn pump(&mut self) {
        self.collect();
        while let Some(request) = self.queue.pop_front() {
            self.ops.push(request.op.clone());
            let response = self.storage.handle(request);
            self.engine.on_storage_response(response);
            self.collect();
        }
    }

    /// Answers the newest request first
    fn pump_newest_first(&mut self) {
        self.collect();
        while let Some(request) = self.queue.pop_back() {
            self.ops.push(request.op.clone());
            let response = self.storage.handle(request);
            self.engine.on_storage_response(response);
            self.collect();
        }
    }

    fn run(&mut self, after_usn: i64) {
        self.start(after_usn);
        self.pump();
    }

    fn fire_timers(&mut self) {
        for deferred in std::mem::take(&mut self.timers) {
            self.engine.on_timer(deferred.token);
            self.pump();
        }
    }

    fn finished(&self) -> Option<&SyncSummary> {
        self.events.iter().find_map(|event| match event {
            SyncEvent::Finished(summary) => Some(summary),
            _ => None,
        })
    }

    fn failures(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Failure(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    fn count_events(&self, matches: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }

    fn phases(&self) -> Vec<SyncPhase> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Progress { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    fn writes_of(&self, kind: EntityKind) -> (usize, usize) {
        let adds = self
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::Add(e) if e.kind() == kind))
            .count();
        let updates = self
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::Update(e) if e.kind() == kind))
            .count();
        (adds, updates)
    }

    fn chunk_calls(&self) -> Vec<i64> {
        self.engine
            .remote()
            .calls_of(RemoteCallKind::SyncChunk)
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::SyncChunk { after_usn, .. } => Some(*after_usn),
                _ => None,
            })
            .collect()
    }
}

fn bookmarks(update_count: i64, sync_time_ms: i64) -> SyncBookmarks {
    SyncBookmarks {
        last_update_count: update_count,
        last_sync_time: Timestamp::from_millis(sync_time_ms),
        ..SyncBookmarks::default()
    }
}

fn state(update_count: i64, current_time_ms: i64) -> SyncState {
    SyncState {
        update_count,
        full_sync_before: Timestamp::from_millis(0),
        current_time: Timestamp::from_millis(current_time_ms),
    }
}

fn two_chunk_fixture() -> RemoteFixture {
    let mut first = SyncChunk::new(50, 120);
    first.tags.push(Tag::new("work").with_guid("t1", 50));
    let mut second = SyncChunk::new(120, 120);
    second.notebooks.push(Notebook::new("Inbox").with_guid("nb1", 120));

    RemoteFixture {
        sync_state: state(120, 1_000),
        chunks: vec![first, second],
        ..RemoteFixture::default()
    }
}

/// One incremental chunk from USN 10 carrying the given tweaks
fn incremental_fixture(update_count: i64, fill: impl FnOnce(&mut SyncChunk)) -> RemoteFixture {
    let mut chunk = SyncChunk::new(update_count, update_count);
    fill(&mut chunk);
    RemoteFixture {
        sync_state: state(update_count, 2_000),
        chunks: vec![chunk],
        ..RemoteFixture::default()
    }
}

#[test]
fn test_full_sync_stops_after_last_chunk() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.run(0);

    assert_eq!(harness.chunk_calls(), vec![0, 50]);
    assert!(harness
        .engine
        .remote()
        .calls_of(RemoteCallKind::AccountSyncState)
        .is_empty());

    let summary = harness.finished().expect("sync should finish");
    assert_eq!(summary.last_update_count, 120);
    assert!(harness.storage.tag("t1").is_some());
    assert!(harness.storage.notebook("nb1").is_some());
    assert!(!harness.engine.is_active());
}

#[test]
fn test_clean_tag_is_updated_in_place() {
    let mut storage = MemoryStorage::new();
    let local = Tag::new("work").with_guid("t1", 3);
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.tags.push(Tag::new("work-renamed").with_guid("t1", 11));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some());
    assert_eq!(harness.writes_of(EntityKind::Tag), (0, 1));
    let stored = harness.storage.tag("t1").unwrap();
    assert_eq!(stored.name.as_deref(), Some("work-renamed"));
    assert_eq!(stored.local_id, local.local_id);
    assert_eq!(stored.usn, Some(11));
}

#[test]
fn test_dirty_note_conflict_adds_one_clone() {
    let mut storage = MemoryStorage::new();
    storage.insert(Notebook::new("Inbox").with_guid("nb1", 1));
    let mut local = Note::new("Draft", "nb1")
        .with_guid("n1", 4)
        .with_content("local");
    local.dirty = true;
    storage.insert(local.clone());

    let fixture = incremental_fixture(12, |chunk| {
        chunk.notes.push(
            Note::new("Draft", "nb1")
                .with_guid("n1", 12)
                .with_content("remote"),
        );
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.writes_of(EntityKind::Note), (1, 1));

    let merged = harness.storage.note("n1").unwrap();
    assert_eq!(merged.content.as_deref(), Some("remote"));
    assert_eq!(merged.local_id, local.local_id);
    assert!(!merged.dirty);

    let clones = harness.storage.notes_titled("Conflicted note Draft");
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].content.as_deref(), Some("local"));
    assert!(clones[0].guid.is_none() && clones[0].dirty);
    assert_eq!(harness.storage.notes.len(), 2);
}

#[test]
fn test_rate_limit_defers_download() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.engine.remote_mut().fail_on(
        RemoteCallKind::SyncChunk,
        1,
        RemoteFailure::RateLimited { seconds: 30 },
    );
    harness.run(0);

    assert_eq!(
        harness.count_events(|e| matches!(e, SyncEvent::RateLimitExceeded { seconds: 30, .. })),
        1
    );
    assert!(harness.ops.is_empty());
    assert_eq!(harness.timers.len(), 1);
    assert_eq!(harness.timers[0].delay, Duration::from_secs(30));
    assert!(harness.finished().is_none());

    harness.fire_timers();
    assert_eq!(harness.chunk_calls(), vec![0, 50, 50]);
    assert!(harness.finished().is_some());
    assert!(harness.storage.tag("t1").is_some());
    assert!(harness.storage.notebook("nb1").is_some());
}

#[test]
fn test_invalid_rate_limit_is_fatal() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.engine.remote_mut().fail_on(
        RemoteCallKind::SyncChunk,
        0,
        RemoteFailure::RateLimited { seconds: 0 },
    );
    harness.run(0);

    assert_eq!(harness.failures().len(), 1);
    assert!(harness.timers.is_empty());
}

#[test]
fn test_notes_of_expunged_notebook_are_dropped() {
    let mut storage = MemoryStorage::new();
    storage.insert(Notebook::new("Old").with_guid("nbx", 2));
    storage.insert(Note::new("stale", "nbx").with_guid("n0", 3));

    let mut first = SyncChunk::new(12, 13);
    first.notes.push(Note::new("fresh", "nbx").with_guid("n1", 11));
    let mut second = SyncChunk::new(13, 13);
    second.expunged_notebooks.push("nbx".into());
    let fixture = RemoteFixture {
        sync_state: state(13, 2_000),
        chunks: vec![first, second],
        ..RemoteFixture::default()
    };

    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some());
    assert!(harness
        .engine
        .remote()
        .calls_of(RemoteCallKind::FullNote)
        .is_empty());
    assert!(harness.ops.contains(&StorageOp::Expunge {
        kind: EntityKind::Notebook,
        guid: "nbx".into(),
    }));
    assert!(harness.storage.notebook("nbx").is_none());
    assert!(harness.storage.notes.is_empty());
}

#[test]
fn test_replaying_same_chunks_is_idempotent() {
    let mut first = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    first.run(0);
    assert!(first.finished().is_some());
    let snapshot = first.storage.clone();

    let mut second = Harness::with_storage(two_chunk_fixture(), snapshot.clone())
        .with_bookmarks(SyncBookmarks::default());
    second.run(0);

    assert!(second.finished().is_some());
    assert_eq!(second.storage, snapshot);
    assert_eq!(second.writes_of(EntityKind::Tag), (0, 0));
    assert_eq!(second.writes_of(EntityKind::Notebook), (0, 0));
}

#[test]
fn test_linked_notebook_remote_version_wins() {
    let mut storage = MemoryStorage::new();
    let mut local = LinkedNotebook::new("ln1", 2).with_share("Old", "key1");
    local.dirty = true;
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk
            .linked_notebooks
            .push(LinkedNotebook::new("ln1", 11).with_share("New", "key1"));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert_eq!(harness.writes_of(EntityKind::LinkedNotebook), (0, 1));
    assert_eq!(harness.storage.linked_notebooks.len(), 1);
    let stored = harness.storage.linked_notebook("ln1").unwrap();
    assert_eq!(stored.share_name.as_deref(), Some("New"));
    assert_eq!(stored.local_id, local.local_id);
    assert!(!stored.dirty);

    // The linked notebook now needs a token
    assert!(harness.events.contains(&SyncEvent::LinkedNotebookAuthTokensRequested(vec![
        TokenRequest {
            guid: "ln1".into(),
            share_key: "key1".into(),
        }
    ])));
}

#[test]
fn test_phases_are_ordered() {
    let mut chunk = SyncChunk::new(3, 3);
    chunk.tags.push(Tag::new("t").with_guid("t1", 1));
    chunk.notebooks.push(Notebook::new("Inbox").with_guid("nb1", 2));
    chunk.notes.push(Note::new("n", "nb1").with_guid("n1", 3));
    let fixture = RemoteFixture {
        sync_state: state(3, 1_000),
        chunks: vec![chunk],
        ..RemoteFixture::default()
    };

    let mut harness = Harness::new(fixture).with_bookmarks(SyncBookmarks::default());
    harness.run(0);
    assert!(harness.finished().is_some());

    let indices: Vec<usize> = harness.phases().iter().map(SyncPhase::index).collect();
    assert!(indices.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(harness.phases().last(), Some(&SyncPhase::Finished));

    let position = |kinds: &[EntityKind]| -> Vec<usize> {
        harness
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| kinds.contains(&op.kind()))
            .map(|(index, _)| index)
            .collect()
    };
    let containers = position(&[EntityKind::Tag, EntityKind::Notebook]);
    let notes = position(&[EntityKind::Note]);
    assert!(!notes.is_empty());
    assert!(containers.iter().max() < notes.iter().min());

    let note = harness.storage.note("n1").unwrap();
    let notebook = harness.storage.notebook("nb1").unwrap();
    assert_eq!(note.notebook_local_id, Some(notebook.local_id));
}

#[test]
fn test_bookmarks_never_move_backwards() {
    let fixture = RemoteFixture {
        sync_state: state(130, 2_000),
        chunks: vec![{
            let mut chunk = SyncChunk::new(130, 130);
            chunk.tags.push(Tag::new("t").with_guid("t1", 125));
            chunk
        }],
        ..RemoteFixture::default()
    };
    let mut harness = Harness::new(fixture).with_bookmarks(bookmarks(120, 1_000));
    harness.run(120);

    let summary = harness.finished().unwrap();
    assert_eq!(summary.last_update_count, 130);
    assert_eq!(summary.last_sync_time, Timestamp::from_millis(2_000));
    assert_eq!(harness.engine.bookmarks(), Some(&summary.bookmarks));
    assert_eq!(harness.chunk_calls(), vec![120]);
}

#[test]
fn test_forced_full_sync_starts_from_zero() {
    let mut fixture = two_chunk_fixture();
    fixture.sync_state.full_sync_before = Timestamp::from_millis(5_000);

    let mut harness = Harness::new(fixture).with_bookmarks(bookmarks(100, 1_000));
    harness.run(100);

    assert!(harness.finished().is_some());
    assert_eq!(harness.chunk_calls(), vec![0, 50]);
}

#[test]
fn test_no_updates_skips_download() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(bookmarks(120, 1_000));
    harness.run(120);

    assert!(harness.finished().is_some());
    assert!(harness.chunk_calls().is_empty());
    assert!(!harness.phases().contains(&SyncPhase::DownloadingOwnAccountChunks));
}

#[test]
fn test_pause_restages_and_resume_continues() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.start(0);
    assert_eq!(harness.queue.len(), 2);

    harness.engine.pause();
    harness.collect();
    assert!(harness.events.contains(&SyncEvent::Paused {
        pending_authentication: false
    }));

    // Responses arriving while paused are folded back
    harness.pump();
    assert!(harness.queue.is_empty());
    assert!(harness.storage.tags.is_empty());

    harness.engine.resume();
    harness.pump();

    assert!(harness.finished().is_some());
    assert!(harness.storage.tag("t1").is_some());
    assert!(harness.storage.notebook("nb1").is_some());
    assert_eq!(harness.chunk_calls(), vec![0, 50]);
}

#[test]
fn test_stop_waits_for_in_flight_requests() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.start(0);
    assert_eq!(harness.queue.len(), 2);

    harness.engine.stop();
    harness.collect();
    assert_eq!(harness.count_events(|e| *e == SyncEvent::Stopped), 0);

    harness.pump();
    assert_eq!(harness.count_events(|e| *e == SyncEvent::Stopped), 1);
    assert_eq!(harness.ops.len(), 2);
    assert!(harness.storage.tags.is_empty());
    assert!(!harness.engine.is_active());
    assert!(harness.finished().is_none());
}

#[test]
fn test_expired_authentication_pauses_until_refreshed() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness
        .engine
        .remote_mut()
        .fail_on(RemoteCallKind::SyncChunk, 0, RemoteFailure::AuthExpired);
    harness.run(0);

    assert!(harness.events.contains(&SyncEvent::AuthenticationExpired));
    assert!(harness.events.contains(&SyncEvent::Paused {
        pending_authentication: true
    }));
    assert!(harness.engine.is_paused());

    harness.engine.on_authentication_refreshed();
    harness.pump();

    assert!(harness.finished().is_some());
    assert_eq!(harness.chunk_calls(), vec![0, 0, 50]);
}

#[test]
fn test_remote_failure_is_reported_once() {
    let mut chunk = SyncChunk::new(2, 2);
    chunk.notes.push(Note::new("a", "nb1").with_guid("n1", 1));
    chunk.notes.push(Note::new("b", "nb1").with_guid("n2", 2));
    let fixture = RemoteFixture {
        sync_state: state(2, 1_000),
        chunks: vec![chunk],
        ..RemoteFixture::default()
    };

    let mut harness = Harness::new(fixture).with_bookmarks(SyncBookmarks::default());
    harness.engine.remote_mut().fail_on(
        RemoteCallKind::FullNote,
        0,
        RemoteFailure::Failed("note store unavailable".into()),
    );
    harness.run(0);

    assert_eq!(
        harness.failures(),
        vec!["Remote error: note store unavailable"]
    );
    assert!(harness.finished().is_none());
    assert!(!harness.engine.is_active());
}

#[test]
fn test_missing_bookmarks_are_requested() {
    let mut harness = Harness::new(two_chunk_fixture());
    harness.start(0);
    assert_eq!(harness.events, vec![SyncEvent::LastSyncParametersRequested]);
    assert!(harness.engine.remote().calls().is_empty());

    harness.engine.set_last_sync_parameters(SyncBookmarks::default());
    harness.pump();
    assert!(harness.finished().is_some());
}

#[test]
fn test_local_item_matched_by_name_is_adopted() {
    let mut storage = MemoryStorage::new();
    let mut local = Tag::new("Work");
    local.local = true;
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.tags.push(Tag::new("work").with_guid("t9", 11));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some());
    assert_eq!(harness.storage.tags.len(), 1);
    let stored = harness.storage.tag("t9").unwrap();
    assert_eq!(stored.local_id, local.local_id);
    assert!(!stored.local);
}

#[test]
fn test_conflicting_resource_clones_its_note() {
    let mut storage = MemoryStorage::new();
    storage.insert(Notebook::new("Inbox").with_guid("nb1", 1));
    let mut note = Note::new("Trip", "nb1").with_guid("n1", 5);
    let mut resource = Resource::new("image/png")
        .with_guid("r1", 5)
        .with_note("n1")
        .with_data(vec![1]);
    resource.dirty = true;
    resource.note_local_id = Some(note.local_id);
    note.resources.push(resource);
    storage.insert(note.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.resources.push(
            Resource::new("image/png")
                .with_guid("r1", 11)
                .with_note("n1")
                .with_data(vec![2]),
        );
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.storage.notes.len(), 2);

    let updated = harness.storage.note("n1").unwrap();
    assert_eq!(updated.local_id, note.local_id);
    let merged = updated.resource("r1").unwrap();
    assert_eq!(merged.data, Some(vec![2]));
    assert!(!merged.dirty);

    let clones = harness
        .storage
        .notes_titled("Note \"Trip\" containing conflicted resource");
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].resources[0].data, Some(vec![1]));
    assert!(clones[0].resources[0].guid.is_none());
}

fn linked_fixture() -> RemoteFixture {
    let mut own = SyncChunk::new(5, 5);
    own.linked_notebooks
        .push(LinkedNotebook::new("ln1", 5).with_share("Shared", "key1"));

    let mut shared = SyncChunk::new(3, 3);
    shared.tags.push(Tag::new("shared-tag").with_guid("lt1", 1));
    shared
        .notebooks
        .push(Notebook::new("Shared").with_guid("lnb1", 2));
    let mut note = Note::new("Shared note", "lnb1").with_guid("ln-n1", 3);
    note.tag_guids.push("lt1".into());
    shared.notes.push(note);

    let mut linked_notebooks = std::collections::BTreeMap::new();
    linked_notebooks.insert(
        "ln1".to_string(),
        LinkedNotebookFixture {
            sync_state: state(3, 900),
            chunks: vec![shared],
        },
    );

    RemoteFixture {
        sync_state: state(5, 1_000),
        chunks: vec![own],
        linked_notebooks,
        ..RemoteFixture::default()
    }
}

fn token(value: &str) -> HashMap<String, LinkedNotebookAuth> {
    HashMap::from([(
        "ln1".to_string(),
        LinkedNotebookAuth::new(value, Timestamp::now().plus_seconds(86_400)),
    )])
}

#[test]
fn test_linked_notebook_sync_with_tokens() {
    let mut harness = Harness::new(linked_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.run(0);

    assert!(harness.finished().is_none());
    assert_eq!(
        harness.engine.phase(),
        SyncPhase::RefreshingLinkedNotebookAuthTokens
    );

    harness.engine.on_linked_notebook_auth_tokens(token("tok"));
    harness.pump();

    let summary = harness.finished().expect("sync should finish").clone();
    assert_eq!(summary.linked_notebook_update_counts.get("ln1"), Some(&3));
    assert_eq!(
        summary.bookmarks.linked_notebook("ln1").unwrap().last_synchronized_usn,
        3
    );

    let calls = harness
        .engine
        .remote()
        .calls_of(RemoteCallKind::LinkedNotebookSyncChunk);
    assert_eq!(
        calls,
        vec![&RemoteCall::LinkedNotebookSyncChunk {
            guid: "ln1".into(),
            after_usn: 0,
            full_sync_only: true,
        }]
    );

    let tag = harness.storage.tag("lt1").unwrap();
    assert_eq!(tag.linked_notebook_guid.as_deref(), Some("ln1"));
    let notebook = harness.storage.notebook("lnb1").unwrap();
    assert_eq!(notebook.linked_notebook_guid.as_deref(), Some("ln1"));
    let note = harness.storage.note("ln-n1").unwrap();
    assert_eq!(note.notebook_local_id, Some(notebook.local_id));
}

#[test]
fn test_expired_linked_token_is_requested_again() {
    let mut harness = Harness::new(linked_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.engine.remote_mut().reject_token("tok");
    harness.run(0);

    harness.engine.on_linked_notebook_auth_tokens(token("tok"));
    harness.pump();
    assert_eq!(
        harness.count_events(|e| matches!(e, SyncEvent::LinkedNotebookAuthTokensRequested(_))),
        2
    );
    assert!(harness.finished().is_none());

    harness.engine.on_linked_notebook_auth_tokens(token("tok2"));
    harness.pump();
    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert!(harness.storage.note("ln-n1").is_some());
}

#[test]
fn test_unchanged_linked_notebook_is_skipped() {
    let mut storage = MemoryStorage::new();
    storage.insert(LinkedNotebook::new("ln1", 5).with_share("Shared", "key1"));

    let mut fixture = linked_fixture();
    fixture.chunks.clear();
    let mut previous = bookmarks(5, 1_000);
    previous.linked_notebooks.insert(
        "ln1".into(),
        notesync_sync_engine::LinkedNotebookBookmark {
            last_update_count: 3,
            last_sync_time: Timestamp::from_millis(900),
            last_synchronized_usn: 3,
        },
    );

    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(previous);
    harness.engine.on_linked_notebook_auth_tokens(token("tok"));
    harness.run(5);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert!(harness
        .engine
        .remote()
        .calls_of(RemoteCallKind::LinkedNotebookSyncChunk)
        .is_empty());
    assert_eq!(
        harness
            .engine
            .remote()
            .calls_of(RemoteCallKind::LinkedNotebookSyncState)
            .len(),
        1
    );
}

#[test]
fn test_linked_notebook_without_share_key_is_fatal() {
    let mut storage = MemoryStorage::new();
    storage.insert(LinkedNotebook::new("ln1", 5));

    // Nothing changed remotely, so the run goes straight to linked notebooks
    let mut harness = Harness::with_storage(RemoteFixture::default(), storage)
        .with_bookmarks(SyncBookmarks::default());
    harness.run(3);

    assert_eq!(harness.failures().len(), 1);
}

#[test]
fn test_synced_notebook_matched_by_name_is_updated() {
    let mut storage = MemoryStorage::new();
    let local = Notebook::new("Inbox").with_guid("nb-old", 3);
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.notebooks.push(Notebook::new("inbox").with_guid("nb-new", 11));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.writes_of(EntityKind::Notebook), (0, 1));
    assert_eq!(harness.storage.notebooks.len(), 1);
    let stored = harness.storage.notebook("nb-new").unwrap();
    assert_eq!(stored.local_id, local.local_id);
    assert_eq!(stored.name.as_deref(), Some("inbox"));
    assert!(harness.storage.notebook("nb-old").is_none());
}

#[test]
fn test_dirty_tag_matched_by_name_conflicts() {
    let mut storage = MemoryStorage::new();
    let mut local = Tag::new("Work").with_guid("t1", 3);
    local.dirty = true;
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.tags.push(Tag::new("work").with_guid("t2", 11));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.writes_of(EntityKind::Tag), (1, 1));
    assert_eq!(harness.storage.tags.len(), 2);

    let merged = harness.storage.tag("t2").unwrap();
    assert_eq!(merged.local_id, local.local_id);
    assert!(!merged.dirty);

    let clones: Vec<&Tag> = harness
        .storage
        .tags
        .iter()
        .filter(|tag| {
            tag.name
                .as_deref()
                .is_some_and(|name| name.starts_with("Conflicted tag Work"))
        })
        .collect();
    assert_eq!(clones.len(), 1);
    assert!(clones[0].guid.is_none() && clones[0].dirty);
}

#[test]
fn test_second_name_match_of_same_local_item_is_added() {
    let mut storage = MemoryStorage::new();
    let mut local = Tag::new("Work");
    local.local = true;
    storage.insert(local.clone());

    let fixture = incremental_fixture(11, |chunk| {
        chunk.tags.push(Tag::new("work").with_guid("t8", 11));
        chunk.tags.push(Tag::new("WORK").with_guid("t9", 11));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.writes_of(EntityKind::Tag), (1, 1));
    assert_eq!(harness.storage.tags.len(), 2);
    assert_eq!(harness.storage.tag("t8").unwrap().local_id, local.local_id);
    assert_ne!(harness.storage.tag("t9").unwrap().local_id, local.local_id);
}

#[test]
fn test_note_update_without_notebook_fails() {
    let mut storage = MemoryStorage::new();
    storage.insert(Note::new("Draft", "nb-missing").with_guid("n1", 4));

    let fixture = incremental_fixture(12, |chunk| {
        chunk
            .notes
            .push(Note::new("Draft", "nb-missing").with_guid("n1", 12));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    let failures = harness.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("nb-missing"));
    assert!(harness.finished().is_none());
    assert!(harness
        .engine
        .remote()
        .calls_of(RemoteCallKind::FullNote)
        .is_empty());
    assert_eq!(harness.writes_of(EntityKind::Note), (0, 0));
}

#[test]
fn test_rate_limited_note_download_survives_pause() {
    let mut storage = MemoryStorage::new();
    storage.insert(Notebook::new("Inbox").with_guid("nb1", 1));
    let local = Note::new("Draft", "nb1").with_guid("n1", 4);
    storage.insert(local.clone());

    let fixture = incremental_fixture(12, |chunk| {
        chunk.notes.push(Note::new("Draft2", "nb1").with_guid("n1", 12));
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.engine.remote_mut().fail_on(
        RemoteCallKind::FullNote,
        0,
        RemoteFailure::RateLimited { seconds: 30 },
    );
    harness.run(10);

    assert_eq!(harness.timers.len(), 1);
    assert!(harness.finished().is_none());
    assert_eq!(harness.writes_of(EntityKind::Note), (0, 0));

    harness.engine.pause();
    harness.pump();
    assert!(harness.events.contains(&SyncEvent::Paused {
        pending_authentication: false
    }));

    harness.engine.resume();
    harness.pump();
    // The parked download was folded back, so its timer has nothing to run
    harness.fire_timers();

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.count_events(|e| matches!(e, SyncEvent::Finished(_))), 1);
    assert_eq!(
        harness
            .engine
            .remote()
            .calls_of(RemoteCallKind::FullNote)
            .len(),
        2
    );
    let stored = harness.storage.note("n1").unwrap();
    assert_eq!(stored.title.as_deref(), Some("Draft2"));
    assert_eq!(stored.local_id, local.local_id);
}

#[test]
fn test_out_of_range_rate_limit_is_fatal() {
    let mut harness = Harness::new(two_chunk_fixture()).with_bookmarks(SyncBookmarks::default());
    harness.engine.remote_mut().fail_on(
        RemoteCallKind::SyncChunk,
        1,
        RemoteFailure::RateLimited { seconds: i64::MAX },
    );
    harness.run(0);

    assert_eq!(harness.failures().len(), 1);
    assert!(harness.failures()[0].contains("out of range"));
    assert!(harness.timers.is_empty());
    assert!(!harness.engine.is_active());
}

#[test]
fn test_resources_of_one_note_share_a_conflict_clone() {
    let mut storage = MemoryStorage::new();
    storage.insert(Notebook::new("Inbox").with_guid("nb1", 1));
    let mut note = Note::new("Trip", "nb1").with_guid("n1", 5);
    for (guid, byte) in [("r1", 1), ("r2", 3)] {
        let mut resource = Resource::new("image/png")
            .with_guid(guid, 5)
            .with_note("n1")
            .with_data(vec![byte]);
        resource.dirty = true;
        resource.note_local_id = Some(note.local_id);
        note.resources.push(resource);
    }
    storage.insert(note.clone());

    let fixture = incremental_fixture(11, |chunk| {
        for (guid, byte) in [("r1", 2), ("r2", 4)] {
            chunk.resources.push(
                Resource::new("image/png")
                    .with_guid(guid, 11)
                    .with_note("n1")
                    .with_data(vec![byte]),
            );
        }
    });
    let mut harness = Harness::with_storage(fixture, storage).with_bookmarks(bookmarks(10, 1_000));
    harness.run(10);

    assert!(harness.finished().is_some(), "{:?}", harness.failures());
    assert_eq!(harness.writes_of(EntityKind::Note), (1, 1));
    assert_eq!(harness.storage.notes.len(), 2);

    let updated = harness.storage.note("n1").unwrap();
    assert_eq!(updated.resource("r1").unwrap().data, Some(vec![2]));
    assert_eq!(updated.resource("r2").unwrap().data, Some(vec![4]));

    let clones = harness
        .storage
        .notes_titled("Note \"Trip\" containing conflicted resource");
    assert_eq!(clones.len(), 1);
    let mut kept: Vec<Option<Vec<u8>>> = clones[0]
        .resources
        .iter()
        .map(|resource| resource.data.clone())
        .collect();
    kept.sort();
    assert_eq!(kept, vec![Some(vec![1]), Some(vec![3])]);
}

fn mixed_fixture() -> RemoteFixture {
    let mut first = SyncChunk::new(20, 40);
    first.tags.push(Tag::new("work").with_guid("t1", 11));
    first.tags.push(Tag::new("home").with_guid("t2", 12));
    first.notebooks.push(Notebook::new("Inbox").with_guid("nb1", 13));
    first.notes.push(Note::new("Plan", "nb1").with_guid("n1", 20));
    let mut second = SyncChunk::new(40, 40);
    second.notebooks.push(Notebook::new("Archive").with_guid("nb2", 30));
    second.notes.push(Note::new("Old plan", "nb2").with_guid("n2", 35));
    second.notes.push(Note::new("Plan v2", "nb1").with_guid("n1", 40));

    RemoteFixture {
        sync_state: state(40, 3_000),
        chunks: vec![first, second],
        ..RemoteFixture::default()
    }
}

/// Guid, name and owner of every stored item, sorted
fn replica(storage: &MemoryStorage) -> Vec<(String, Option<String>, Option<String>)> {
    let mut rows: Vec<_> = storage
        .tags
        .iter()
        .map(|tag| (tag.guid.clone(), tag.name.clone(), None))
        .chain(
            storage
                .notebooks
                .iter()
                .map(|notebook| (notebook.guid.clone(), notebook.name.clone(), None)),
        )
        .chain(storage.notes.iter().map(|note| {
            (
                note.guid.clone(),
                note.title.clone(),
                note.notebook_guid.clone(),
            )
        }))
        .map(|(guid, name, owner)| (guid.unwrap_or_default(), name, owner))
        .collect();
    rows.sort();
    rows
}

#[test]
fn test_completion_order_does_not_change_replica() {
    let seed = || {
        let mut storage = MemoryStorage::new();
        storage.insert(Tag::new("work").with_guid("t1", 2));
        storage
    };

    let mut in_order = Harness::with_storage(mixed_fixture(), seed())
        .with_bookmarks(bookmarks(10, 1_000));
    in_order.run(10);

    let mut reversed = Harness::with_storage(mixed_fixture(), seed())
        .with_bookmarks(bookmarks(10, 1_000));
    reversed.start(10);
    reversed.pump_newest_first();

    assert!(in_order.finished().is_some(), "{:?}", in_order.failures());
    assert!(reversed.finished().is_some(), "{:?}", reversed.failures());
    assert_eq!(replica(&in_order.storage), replica(&reversed.storage));
    assert_eq!(
        replica(&reversed.storage),
        vec![
            ("n1".to_string(), Some("Plan v2".to_string()), Some("nb1".to_string())),
            ("n2".to_string(), Some("Old plan".to_string()), Some("nb2".to_string())),
            ("nb1".to_string(), Some("Inbox".to_string()), None),
            ("nb2".to_string(), Some("Archive".to_string()), None),
            ("t1".to_string(), Some("work".to_string()), None),
            ("t2".to_string(), Some("home".to_string()), None),
        ]
    );
    assert_eq!(
        in_order.finished().map(|summary| summary.last_update_count),
        reversed.finished().map(|summary| summary.last_update_count)
    );
}

