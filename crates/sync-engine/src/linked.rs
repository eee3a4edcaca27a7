// crates/sync-engine/src/linked.rs
//! Linked notebook listing, tokens and state checks

use crate::download::DownloadCursor;
use crate::engine::{DeferredOp, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::events::{SyncEvent, TokenRequest};
use crate::protocol::RemoteSyncClient;
use crate::reconcile::PendingContext;
use crate::storage::StorageOp;
use crate::types::{OperationKind, SyncPhase};
use log::{debug, info, warn};
use notesync_core::{
    ensure_valid, EntityKind, LinkedNotebook, SyncChunk, SyncState, Timestamp,
};
use std::collections::HashMap;

/// Per-run linked notebook bookkeeping
#[derive(Debug, Default)]
pub(crate) struct LinkedNotebookState {
    /// Every linked notebook known to local storage
    pub all: Vec<LinkedNotebook>,
    pub listed: bool,
    pub list_offset: u32,
    pub tokens_requested: bool,
    pub awaiting_tokens: Vec<String>,
    pub sync_states: HashMap<String, SyncState>,
    pub cursors: HashMap<String, DownloadCursor>,
    /// Tag or notebook guid to owning linked notebook guid
    pub ownership: HashMap<String, String>,
    pub noteless_tags_requested: bool,
    pub noteless_tags_expunged: bool,
}

impl<R: RemoteSyncClient> SyncEngine<R> {
    /// Enters the linked notebook pipeline
    pub(crate) fn start_linked_notebooks(&mut self) {
        self.linked.all.clear();
        self.linked.listed = false;
        self.linked.list_offset = 0;
        self.enter_phase(SyncPhase::ListingAllLinkedNotebooks);
    }

    pub(crate) fn linked_notebook_guid(&self, linked_notebook: &LinkedNotebook) -> SyncResult<String> {
        linked_notebook
            .guid
            .clone()
            .ok_or(SyncError::MissingGuid(EntityKind::LinkedNotebook))
    }

    pub(crate) fn token_for(&self, guid: &str) -> SyncResult<String> {
        self.auth_tokens
            .get(guid)
            .map(|auth| auth.token.clone())
            .ok_or_else(|| {
                SyncError::LinkedNotebookAuth(format!("no auth token for linked notebook {}", guid))
            })
    }

    /// Returns true if a linked notebook has changes since its bookmark
    pub(crate) fn linked_notebook_changed(&self, guid: &str, state: &SyncState) -> bool {
        match self
            .bookmarks
            .as_ref()
            .and_then(|bookmarks| bookmarks.linked_notebook(guid))
        {
            Some(bookmark) => {
                state.update_count != bookmark.last_update_count
                    || state.full_sync_before > bookmark.last_sync_time
            }
            None => true,
        }
    }

    /// Records which linked notebook owns the tags and notebooks of a chunk
    pub(crate) fn map_linked_ownership(&mut self, owner: &str, chunk: &SyncChunk) -> SyncResult<()> {
        for tag in &chunk.tags {
            let guid = tag.guid.clone().ok_or(SyncError::MissingGuid(EntityKind::Tag))?;
            self.linked.ownership.insert(guid, owner.to_string());
        }
        for notebook in &chunk.notebooks {
            let guid = notebook
                .guid
                .clone()
                .ok_or(SyncError::MissingGuid(EntityKind::Notebook))?;
            self.linked.ownership.insert(guid, owner.to_string());
        }
        for guid in chunk.expunged_tags.iter().chain(&chunk.expunged_notebooks) {
            self.linked.ownership.remove(guid);
        }
        Ok(())
    }

    /// Pages through local linked notebooks; true once all are listed
    pub(crate) fn drive_listing(&mut self) -> bool {
        if self.linked.listed {
            return true;
        }
        if self
            .tracker
            .pending_count(EntityKind::LinkedNotebook, OperationKind::ListAll)
            == 0
        {
            let limit = self.config.linked_notebook_page_size.max(1);
            self.request(
                StorageOp::ListLinkedNotebooks {
                    limit,
                    offset: self.linked.list_offset,
                },
                PendingContext::ListLinkedNotebooks { limit },
            );
        }
        false
    }

    pub(crate) fn on_linked_notebooks_page(&mut self, page: Vec<LinkedNotebook>, limit: u32) {
        let count = page.len() as u32;
        self.linked.list_offset += count;

        for linked_notebook in page {
            let known = self
                .linked
                .all
                .iter()
                .any(|ln| ln.guid.is_some() && ln.guid == linked_notebook.guid);
            if !known {
                self.linked.all.push(linked_notebook);
            }
        }

        if count < limit {
            self.linked.listed = true;
            info!("Found {} linked notebooks", self.linked.all.len());
        }
    }

    /// Requests missing or expiring tokens; true once every token is usable
    pub(crate) fn drive_token_refresh(&mut self) -> SyncResult<bool> {
        if self.linked.tokens_requested {
            return Ok(false);
        }

        let now = Timestamp::now();
        let min_validity = self.config.auth_token_min_validity_secs;
        let mut needed = Vec::new();

        for linked_notebook in &self.linked.all {
            ensure_valid(linked_notebook)?;
            let (Some(guid), Some(share_key)) =
                (&linked_notebook.guid, &linked_notebook.share_key)
            else {
                continue;
            };

            let usable = self
                .auth_tokens
                .get(guid)
                .is_some_and(|auth| auth.is_valid_for(now, min_validity));
            if !usable {
                needed.push(TokenRequest {
                    guid: guid.clone(),
                    share_key: share_key.clone(),
                });
            }
        }

        if needed.is_empty() {
            return Ok(true);
        }

        info!("Requesting auth tokens for {} linked notebooks", needed.len());
        self.linked.tokens_requested = true;
        self.linked.awaiting_tokens = needed.iter().map(|request| request.guid.clone()).collect();
        self.emit(SyncEvent::LinkedNotebookAuthTokensRequested(needed));
        Ok(false)
    }

    /// Verifies that every requested token arrived
    pub(crate) fn check_received_tokens(&mut self) -> SyncResult<()> {
        self.linked.tokens_requested = false;
        for guid in std::mem::take(&mut self.linked.awaiting_tokens) {
            if !self.auth_tokens.contains_key(&guid) {
                return Err(SyncError::LinkedNotebookAuth(format!(
                    "no auth token received for linked notebook {}",
                    guid
                )));
            }
        }
        Ok(())
    }

    /// Drops cached tokens and requests them again
    pub(crate) fn on_linked_notebook_auth_expired(&mut self) {
        warn!("Linked notebook authentication expired, refreshing tokens");
        self.auth_tokens.clear();
        self.linked.tokens_requested = false;
        self.linked.awaiting_tokens.clear();
        self.enter_phase(SyncPhase::RefreshingLinkedNotebookAuthTokens);
    }

    /// Fetches linked notebook states; finishes the run if none changed
    pub(crate) fn check_linked_notebooks_state(&mut self) -> SyncResult<()> {
        for linked_notebook in self.linked.all.clone() {
            let guid = self.linked_notebook_guid(&linked_notebook)?;
            if self.linked.sync_states.contains_key(&guid) {
                continue;
            }
            let token = self.token_for(&guid)?;
            match self
                .remote
                .get_linked_notebook_sync_state(&linked_notebook, &token)
            {
                Ok(state) => {
                    debug!(
                        "Linked notebook {} is at update count {}",
                        guid, state.update_count
                    );
                    self.linked.sync_states.insert(guid, state);
                }
                Err(failure) => {
                    return self.on_remote_failure(failure, DeferredOp::Resume(self.phase));
                }
            }
        }

        let changed = self
            .linked
            .sync_states
            .iter()
            .any(|(guid, state)| self.linked_notebook_changed(guid, state));

        if changed {
            self.enter_phase(SyncPhase::DownloadingLinkedNotebookChunks);
        } else {
            info!("Linked notebooks are up to date");
            let bookmarks = self.bookmarks.clone().unwrap_or_default();
            for (guid, state) in &self.linked.sync_states {
                let start = bookmarks
                    .linked_notebook(guid)
                    .map_or(0, |bookmark| bookmark.last_synchronized_usn);
                let mut cursor = DownloadCursor::starting_at(start);
                cursor.observe_state(state);
                cursor.complete = true;
                self.linked.cursors.insert(guid.clone(), cursor);
            }
            self.finish();
        }
        Ok(())
    }

    /// Asks storage once to drop linked notebook tags no note refers to
    pub(crate) fn drive_noteless_tags(&mut self) -> bool {
        if !self.linked.noteless_tags_requested {
            self.linked.noteless_tags_requested = true;
            self.request(
                StorageOp::ExpungeNotelessTagsInLinkedNotebooks,
                PendingContext::ExpungeNotelessTags,
            );
        }
        self.linked.noteless_tags_expunged
    }
}
