// crates/sync-engine/src/download.rs
//! Chunk download loops for the own account and linked notebooks

use crate::engine::{DeferredOp, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::protocol::RemoteSyncClient;
use crate::types::{SyncMode, SyncPhase};
use log::{debug, info};
use notesync_core::{SyncChunk, SyncChunkFilter, SyncState, Timestamp, Usn};

/// Progress of one chunk stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DownloadCursor {
    /// Highest USN received so far
    pub after_usn: Usn,
    /// Highest server update count observed
    pub update_count: i64,
    /// Latest server time observed
    pub sync_time: Timestamp,
    pub complete: bool,
}

impl DownloadCursor {
    pub fn starting_at(after_usn: Usn) -> Self {
        Self {
            after_usn,
            ..Self::default()
        }
    }

    pub fn observe_state(&mut self, state: &SyncState) {
        self.update_count = self.update_count.max(state.update_count);
        self.sync_time = self.sync_time.max(state.current_time);
    }

    /// Advances past a received chunk
    ///
    /// A chunk that does not move the cursor forward must be the last one.
    pub fn record(&mut self, chunk: &SyncChunk) -> SyncResult<()> {
        if let Some(high_usn) = chunk.high_usn {
            if high_usn <= self.after_usn && !chunk.is_last() {
                return Err(SyncError::InvalidData(format!(
                    "sync chunk high USN {} does not advance past {}",
                    high_usn, self.after_usn
                )));
            }
            self.after_usn = self.after_usn.max(high_usn);
        }
        self.update_count = self.update_count.max(chunk.update_count);
        self.sync_time = self.sync_time.max(chunk.current_time);
        Ok(())
    }
}

impl<R: RemoteSyncClient> SyncEngine<R> {
    /// Pulls own account chunks until the server reports no more
    pub(crate) fn download_own_chunks(&mut self) -> SyncResult<()> {
        let filter = match self.mode {
            SyncMode::Full => SyncChunkFilter::full(self.config.full_sync_include_resources),
            SyncMode::Incremental => SyncChunkFilter::incremental(),
        };
        let include_resources = self.mode == SyncMode::Incremental;

        loop {
            let after_usn = self.own.after_usn;
            let chunk = match self.remote.get_sync_chunk(
                after_usn,
                self.config.max_sync_chunk_entries,
                &filter,
            ) {
                Ok(chunk) => chunk,
                Err(failure) => {
                    return self.on_remote_failure(failure, DeferredOp::Resume(self.phase));
                }
            };

            self.own.record(&chunk)?;
            debug!(
                "Downloaded chunk after USN {}: {} items, high USN {:?} of {}",
                after_usn,
                chunk.item_count(),
                chunk.high_usn,
                chunk.update_count
            );
            self.emit(SyncEvent::SyncChunksDownloadProgress {
                highest_downloaded_usn: self.own.after_usn,
                highest_server_usn: chunk.update_count,
                last_previous_usn: self.last_usn_on_start,
            });

            let last = chunk.is_last();
            self.staging.append_chunk(chunk, include_resources)?;
            if last {
                break;
            }
        }

        self.own.complete = true;
        info!("Own account chunks downloaded up to USN {}", self.own.after_usn);
        self.emit(SyncEvent::SyncChunksDownloaded);
        self.enter_phase(SyncPhase::SyncingOwnAccountContainers);
        Ok(())
    }

    /// Pulls the chunks of every linked notebook that changed
    pub(crate) fn download_linked_notebook_chunks(&mut self) -> SyncResult<()> {
        for linked_notebook in self.linked.all.clone() {
            let guid = self.linked_notebook_guid(&linked_notebook)?;
            if self.linked.cursors.get(&guid).is_some_and(|c| c.complete) {
                continue;
            }
            let token = self.token_for(&guid)?;

            let state = match self.linked.sync_states.get(&guid).copied() {
                Some(state) => state,
                None => match self
                    .remote
                    .get_linked_notebook_sync_state(&linked_notebook, &token)
                {
                    Ok(state) => {
                        self.linked.sync_states.insert(guid.clone(), state);
                        state
                    }
                    Err(failure) => {
                        return self.on_remote_failure(failure, DeferredOp::Resume(self.phase));
                    }
                },
            };

            let bookmark = self
                .bookmarks
                .as_ref()
                .and_then(|bookmarks| bookmarks.linked_notebook(&guid))
                .copied();
            if !self.linked_notebook_changed(&guid, &state) {
                debug!("Linked notebook {} has no updates", guid);
                let mut cursor =
                    DownloadCursor::starting_at(bookmark.map_or(0, |b| b.last_synchronized_usn));
                cursor.observe_state(&state);
                cursor.complete = true;
                self.linked.cursors.insert(guid, cursor);
                continue;
            }

            let full = match bookmark {
                Some(bookmark) => state.full_sync_before > bookmark.last_sync_time,
                None => true,
            };
            let start_usn = match bookmark {
                Some(bookmark) if !full => bookmark.last_synchronized_usn,
                _ => 0,
            };
            let mut cursor = self
                .linked
                .cursors
                .get(&guid)
                .copied()
                .unwrap_or_else(|| DownloadCursor::starting_at(start_usn));
            cursor.observe_state(&state);

            loop {
                let result = self.remote.get_linked_notebook_sync_chunk(
                    &linked_notebook,
                    cursor.after_usn,
                    self.config.max_sync_chunk_entries,
                    &token,
                    full,
                );
                let chunk = match result {
                    Ok(chunk) => chunk,
                    Err(failure) => {
                        self.linked.cursors.insert(guid.clone(), cursor);
                        return self.on_remote_failure(failure, DeferredOp::Resume(self.phase));
                    }
                };

                cursor.record(&chunk)?;
                self.map_linked_ownership(&guid, &chunk)?;
                self.emit(SyncEvent::LinkedNotebookChunksDownloadProgress {
                    linked_notebook_guid: guid.clone(),
                    highest_downloaded_usn: cursor.after_usn,
                    highest_server_usn: chunk.update_count,
                    last_previous_usn: start_usn,
                });

                let last = chunk.is_last();
                self.staging.append_chunk(chunk, !full)?;
                if last {
                    break;
                }
            }

            cursor.complete = true;
            debug!(
                "Linked notebook {} downloaded up to USN {}",
                guid, cursor.after_usn
            );
            self.linked.cursors.insert(guid, cursor);
        }

        info!("Linked notebook chunks downloaded");
        self.emit(SyncEvent::LinkedNotebookChunksDownloaded);
        self.enter_phase(SyncPhase::SyncingLinkedNotebookContainers);
        Ok(())
    }
}
