// crates/sync-engine/src/lib.rs
//! Remote-to-local note synchronization engine
//!
//! This crate downloads changes from a remote note service and applies them
//! to a local replica:
//! - Full and incremental sync of the user's own account
//! - Linked notebooks shared by other users, with per-notebook tokens
//! - Duplicate detection and conflict cloning
//! - Rate limit backoff, pause/resume and cooperative stop
//!
//! # Example
//!
//! ```rust
//! use notesync_core::{SyncChunk, Tag};
//! use notesync_sync_engine::{
//!     EngineConfig, MemoryStorage, RemoteFixture, ReplayRemote, SyncBookmarks, SyncEngine,
//!     SyncEvent,
//! };
//!
//! let mut chunk = SyncChunk::new(1, 1);
//! chunk.tags.push(Tag::new("work").with_guid("t1", 1));
//! let fixture = RemoteFixture {
//!     chunks: vec![chunk],
//!     ..RemoteFixture::default()
//! };
//!
//! let mut engine = SyncEngine::new(EngineConfig::default(), ReplayRemote::new(fixture));
//! let mut storage = MemoryStorage::new();
//! engine.set_last_sync_parameters(SyncBookmarks::default());
//! engine.start(0);
//!
//! let mut finished = false;
//! loop {
//!     let outbox = engine.take_outbox();
//!     finished |= outbox
//!         .events
//!         .iter()
//!         .any(|event| matches!(event, SyncEvent::Finished(_)));
//!     if outbox.requests.is_empty() {
//!         break;
//!     }
//!     for request in outbox.requests {
//!         let response = storage.handle(request);
//!         engine.on_storage_response(response);
//!     }
//! }
//!
//! assert!(finished);
//! assert!(storage.tag("t1").is_some());
//! ```

mod conflict;
mod download;
mod engine;
mod error;
mod events;
mod linked;
mod memory;
mod protocol;
mod reconcile;
mod replay;
mod runner;
mod staging;
mod storage;
mod tracker;
mod types;

pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::{Outbox, SyncCommand, SyncEvent, SyncInput, SyncSummary, TokenRequest};
pub use memory::MemoryStorage;
pub use protocol::{RemoteFailure, RemoteResult, RemoteSyncClient};
pub use replay::{LinkedNotebookFixture, RemoteCall, RemoteCallKind, RemoteFixture, ReplayRemote};
pub use runner::{SyncHandle, SyncRunner};
pub use storage::{
    LocalStorageService, StorageFailure, StorageOp, StoragePayload, StorageRequest,
    StorageResponder, StorageResponse,
};
pub use types::{
    EngineConfig, LinkedNotebookBookmark, OperationKind, RequestId, SyncBookmarks, SyncMode,
    SyncPhase,
};
