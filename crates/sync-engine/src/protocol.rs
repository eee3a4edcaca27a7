// crates/sync-engine/src/protocol.rs
//! Remote sync service contract
//!
//! Calls block until the remote side answers. Every outcome is normalized
//! into [`RemoteResult`], so the engine only distinguishes rate limiting,
//! expired authentication and everything else.

use notesync_core::{LinkedNotebook, Note, SyncChunk, SyncChunkFilter, SyncState, Usn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure outcome of a remote call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RemoteFailure {
    /// The caller must wait before retrying
    #[error("Rate limit exceeded, retry in {seconds} seconds")]
    RateLimited { seconds: i64 },

    /// Credentials must be refreshed before the run can continue
    #[error("Authentication expired")]
    AuthExpired,

    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

/// Result type for remote calls
pub type RemoteResult<T> = Result<T, RemoteFailure>;

/// Operations the engine needs from the remote service
pub trait RemoteSyncClient: Send {
    /// Gets the sync state of the user's own account
    fn get_account_sync_state(&mut self) -> RemoteResult<SyncState>;

    /// Gets the next chunk of the own account's delta feed
    fn get_sync_chunk(
        &mut self,
        after_usn: Usn,
        max_entries: u32,
        filter: &SyncChunkFilter,
    ) -> RemoteResult<SyncChunk>;

    /// Gets a note with its content and, optionally, resource bodies
    fn get_full_note(&mut self, guid: &str, with_resource_data: bool) -> RemoteResult<Note>;

    /// Gets the sync state of a linked notebook
    fn get_linked_notebook_sync_state(
        &mut self,
        linked_notebook: &LinkedNotebook,
        auth_token: &str,
    ) -> RemoteResult<SyncState>;

    /// Gets the next chunk of a linked notebook's delta feed
    fn get_linked_notebook_sync_chunk(
        &mut self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        max_entries: u32,
        auth_token: &str,
        full_sync_only: bool,
    ) -> RemoteResult<SyncChunk>;
}

impl<T: RemoteSyncClient + ?Sized> RemoteSyncClient for Box<T> {
    fn get_account_sync_state(&mut self) -> RemoteResult<SyncState> {
        (**self).get_account_sync_state()
    }

    fn get_sync_chunk(
        &mut self,
        after_usn: Usn,
        max_entries: u32,
        filter: &SyncChunkFilter,
    ) -> RemoteResult<SyncChunk> {
        (**self).get_sync_chunk(after_usn, max_entries, filter)
    }

    fn get_full_note(&mut self, guid: &str, with_resource_data: bool) -> RemoteResult<Note> {
        (**self).get_full_note(guid, with_resource_data)
    }

    fn get_linked_notebook_sync_state(
        &mut self,
        linked_notebook: &LinkedNotebook,
        auth_token: &str,
    ) -> RemoteResult<SyncState> {
        (**self).get_linked_notebook_sync_state(linked_notebook, auth_token)
    }

    fn get_linked_notebook_sync_chunk(
        &mut self,
        linked_notebook: &LinkedNotebook,
        after_usn: Usn,
        max_entries: u32,
        auth_token: &str,
        full_sync_only: bool,
    ) -> RemoteResult<SyncChunk> {
        (**self).get_linked_notebook_sync_chunk(
            linked_notebook,
            after_usn,
            max_entries,
            auth_token,
            full_sync_only,
        )
    }
}
