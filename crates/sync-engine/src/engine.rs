// crates/sync-engine/src/engine.rs
//! Main sync engine
//!
//! [`SyncEngine`] is a deterministic state machine. It never blocks on local
//! storage: requests, timers and notifications are queued in an [`Outbox`]
//! which the host drains with [`SyncEngine::take_outbox`] after every input.
//! Remote calls are made inline through the [`RemoteSyncClient`].

use crate::download::DownloadCursor;
use crate::error::{SyncError, SyncResult};
use crate::events::{Outbox, SyncCommand, SyncEvent, SyncInput, SyncSummary};
use crate::linked::LinkedNotebookState;
use crate::protocol::{RemoteFailure, RemoteSyncClient};
use crate::reconcile::{ParkedNote, PendingContext, ResourceConflict};
use crate::staging::Staging;
use crate::storage::StorageResponse;
use crate::tracker::RequestTracker;
use crate::types::{EngineConfig, SyncBookmarks, SyncMode, SyncPhase};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use notesync_core::{LinkedNotebookAuth, LocalId, Notebook, Usn};
use notesync_resilience::{Cooldown, DeferredQueue, ResilienceError, TimerToken};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Work parked behind a rate limit
#[derive(Debug)]
pub(crate) enum DeferredOp {
    /// Re-drive the remote calls of a phase
    Resume(SyncPhase),
    /// Fetch the full content of a note
    FetchNote(ParkedNote),
}

/// Remote-to-local synchronization engine
pub struct SyncEngine<R: RemoteSyncClient> {
    pub(crate) config: EngineConfig,
    pub(crate) remote: R,
    pub(crate) bookmarks: Option<SyncBookmarks>,
    pub(crate) phase: SyncPhase,
    pub(crate) mode: SyncMode,
    pub(crate) active: bool,
    pub(crate) paused: bool,
    pub(crate) pending_authentication: bool,
    pub(crate) stop_requested: bool,
    /// Start postponed until bookmarks are supplied
    pub(crate) start_requested: Option<Usn>,
    pub(crate) last_usn_on_start: Usn,
    pub(crate) own: DownloadCursor,
    pub(crate) own_account_changed: bool,
    pub(crate) linked: LinkedNotebookState,
    /// Survives `clear`
    pub(crate) auth_tokens: HashMap<String, LinkedNotebookAuth>,
    pub(crate) staging: Staging,
    pub(crate) tracker: RequestTracker<PendingContext>,
    pub(crate) deferred: DeferredQueue<DeferredOp>,
    pub(crate) outbox: Outbox,
    pub(crate) notebooks_by_guid: HashMap<String, Notebook>,
    pub(crate) resource_conflicts: HashMap<String, Vec<ResourceConflict>>,
    pub(crate) conflict_notebook_lookups: HashSet<String>,
    pub(crate) attempted_by_name: HashSet<LocalId>,
    pub(crate) notes_total: usize,
    pub(crate) notes_processed: usize,
    pub(crate) expunge_step: usize,
}

impl<R: RemoteSyncClient> SyncEngine<R> {
    /// Creates an idle engine
    pub fn new(config: EngineConfig, remote: R) -> Self {
        Self {
            config,
            remote,
            bookmarks: None,
            phase: SyncPhase::Idle,
            mode: SyncMode::Incremental,
            active: false,
            paused: false,
            pending_authentication: false,
            stop_requested: false,
            start_requested: None,
            last_usn_on_start: 0,
            own: DownloadCursor::default(),
            own_account_changed: false,
            linked: LinkedNotebookState::default(),
            auth_tokens: HashMap::new(),
            staging: Staging::default(),
            tracker: RequestTracker::new(),
            deferred: DeferredQueue::new(),
            outbox: Outbox::default(),
            notebooks_by_guid: HashMap::new(),
            resource_conflicts: HashMap::new(),
            conflict_notebook_lookups: HashSet::new(),
            attempted_by_name: HashSet::new(),
            notes_total: 0,
            notes_processed: 0,
            expunge_step: 0,
        }
    }

    /// Supplies the bookmarks persisted by the previous run
    pub fn set_last_sync_parameters(&mut self, bookmarks: SyncBookmarks) {
        debug!(
            "Last sync parameters: update count {}, sync time {}",
            bookmarks.last_update_count, bookmarks.last_sync_time
        );
        self.bookmarks = Some(bookmarks);

        if let Some(after_usn) = self.start_requested.take() {
            self.start(after_usn);
        }
    }

    /// Starts a run from the given high-water mark
    ///
    /// While paused this behaves as [`resume`](Self::resume).
    pub fn start(&mut self, after_usn: Usn) {
        if self.paused {
            self.resume();
            return;
        }
        if self.active {
            debug!("Sync already running, ignoring start");
            return;
        }

        let first_sync = match &self.bookmarks {
            Some(bookmarks) => !bookmarks.has_synced_before(),
            None => {
                self.start_requested = Some(after_usn);
                self.emit(SyncEvent::LastSyncParametersRequested);
                return;
            }
        };

        self.clear();
        self.active = true;
        self.last_usn_on_start = after_usn;
        self.own = DownloadCursor::starting_at(after_usn);
        info!("Starting sync after USN {}", after_usn);

        if after_usn == 0 && first_sync {
            self.mode = SyncMode::Full;
            self.own_account_changed = true;
            self.enter_phase(SyncPhase::DownloadingOwnAccountChunks);
        } else {
            self.enter_phase(SyncPhase::CheckingOwnAccountSyncState);
        }

        self.guarded(|engine| engine.advance());
    }

    /// Stops the run once in-flight requests have drained
    pub fn stop(&mut self) {
        if !self.active {
            self.emit(SyncEvent::Stopped);
            return;
        }

        info!("Stopping sync");
        self.stop_requested = true;
        let dropped = self.deferred.drain();
        if !dropped.is_empty() {
            debug!("Dropped {} deferred operations", dropped.len());
        }

        self.guarded(|engine| engine.advance());
    }

    /// Suspends dispatching; in-flight work is folded back into staging
    pub fn pause(&mut self) {
        if !self.active || self.paused {
            debug!("Nothing to pause");
            return;
        }
        info!("Pausing sync");
        self.suspend(false);
    }

    /// Continues a paused run
    pub fn resume(&mut self) {
        if !self.active || !self.paused {
            debug!("Nothing to resume");
            return;
        }

        self.paused = false;
        self.pending_authentication = false;

        if self.own.complete && self.own.after_usn >= self.last_usn_on_start {
            info!("Resuming sync at phase: {}", self.phase);
            self.guarded(|engine| engine.advance());
        } else {
            info!("Restarting sync after USN {}", self.last_usn_on_start);
            let after_usn = self.last_usn_on_start;
            self.active = false;
            self.start(after_usn);
        }
    }

    /// Continues a run paused for re-authentication
    pub fn on_authentication_refreshed(&mut self) {
        if self.paused && self.pending_authentication {
            self.resume();
        } else {
            debug!("No run is waiting for authentication");
        }
    }

    /// Receives linked notebook tokens requested earlier
    pub fn on_linked_notebook_auth_tokens(&mut self, tokens: HashMap<String, LinkedNotebookAuth>) {
        debug!("Received {} linked notebook auth tokens", tokens.len());
        self.auth_tokens.extend(tokens);

        if !self.active || !self.linked.tokens_requested {
            return;
        }
        self.guarded(|engine| {
            engine.check_received_tokens()?;
            engine.advance()
        });
    }

    /// Processes a local storage response
    pub fn on_storage_response(&mut self, response: StorageResponse) {
        let Some(pending) = self.tracker.complete(response.id) else {
            debug!("Ignoring response to unknown request {}", response.id);
            return;
        };
        debug!(
            "Storage response {} for {:?} {}",
            response.id, pending.operation, pending.kind
        );

        if !self.active {
            return;
        }
        self.guarded(|engine| {
            engine.handle_response(pending, response.result)?;
            engine.advance()
        });
    }

    /// Resumes an operation parked behind a rate limit
    pub fn on_timer(&mut self, token: TimerToken) {
        let operation = match self.deferred.fire(token) {
            Ok(operation) => operation,
            Err(err) => {
                debug!("Ignoring {}: {}", token, err);
                return;
            }
        };
        if !self.active {
            return;
        }

        debug!("Timer {} fired for {:?}", token, operation);
        self.guarded(|engine| {
            match operation {
                DeferredOp::Resume(phase) if phase != engine.phase => {
                    debug!("Phase moved on from {}, nothing to resume", phase);
                }
                DeferredOp::Resume(_) => {}
                DeferredOp::FetchNote(parked) => engine.fetch_full_note(parked)?,
            }
            engine.advance()
        });
    }

    /// Applies a command
    pub fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Start { after_usn } => self.start(after_usn),
            SyncCommand::Stop => self.stop(),
            SyncCommand::Pause => self.pause(),
            SyncCommand::Resume => self.resume(),
            SyncCommand::SetLastSyncParameters(bookmarks) => {
                self.set_last_sync_parameters(bookmarks)
            }
            SyncCommand::LinkedNotebookAuthTokens(tokens) => {
                self.on_linked_notebook_auth_tokens(tokens)
            }
            SyncCommand::AuthenticationRefreshed => self.on_authentication_refreshed(),
        }
    }

    /// Applies any input
    pub fn handle(&mut self, input: SyncInput) {
        match input {
            SyncInput::Command(command) => self.handle_command(command),
            SyncInput::Storage(response) => self.on_storage_response(response),
            SyncInput::Timer(token) => self.on_timer(token),
        }
    }

    /// Takes the requests, timers and events produced so far
    pub fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Bookmarks as of the last completed run
    pub fn bookmarks(&self) -> Option<&SyncBookmarks> {
        self.bookmarks.as_ref()
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Consumes the engine, returning the remote client
    pub fn into_remote(self) -> R {
        self.remote
    }

    pub(crate) fn emit(&mut self, event: SyncEvent) {
        self.outbox.events.push(event);
    }

    pub(crate) fn enter_phase(&mut self, phase: SyncPhase) {
        info!("Sync phase: {}", phase);
        self.phase = phase;
        self.emit(SyncEvent::Progress {
            phase,
            fraction: phase.fraction(),
        });
    }

    fn guarded<F>(&mut self, operation: F)
    where
        F: FnOnce(&mut Self) -> SyncResult<()>,
    {
        if let Err(err) = operation(self) {
            self.fail(err);
        }
    }

    fn fail(&mut self, err: SyncError) {
        if !self.active {
            return;
        }
        error!("Sync failed: {}", err);
        self.emit(SyncEvent::Failure(err.to_string()));
        self.clear();
        self.active = false;
    }

    /// Resets all per-run state
    ///
    /// Bookmarks and linked notebook tokens are kept.
    pub(crate) fn clear(&mut self) {
        self.phase = SyncPhase::Idle;
        self.mode = SyncMode::Incremental;
        self.paused = false;
        self.pending_authentication = false;
        self.stop_requested = false;
        self.last_usn_on_start = 0;
        self.own = DownloadCursor::default();
        self.own_account_changed = false;
        self.linked = LinkedNotebookState::default();
        self.staging.clear();
        self.tracker.clear();
        // Drained rather than replaced so stale timer tokens never match new ones
        self.deferred.drain();
        self.notebooks_by_guid.clear();
        self.resource_conflicts.clear();
        self.conflict_notebook_lookups.clear();
        self.attempted_by_name.clear();
        self.notes_total = 0;
        self.notes_processed = 0;
        self.expunge_step = 0;
    }

    pub(crate) fn suspend(&mut self, pending_authentication: bool) {
        self.paused = true;
        self.pending_authentication = pending_authentication;

        for operation in self.deferred.drain() {
            if let DeferredOp::FetchNote(parked) = operation {
                self.fold_back(parked);
            }
        }

        self.emit(SyncEvent::Paused {
            pending_authentication,
        });
    }

    /// Returns true while a remote call of the current phase waits on a timer
    pub(crate) fn remote_call_parked(&self) -> bool {
        self.deferred
            .iter()
            .any(|operation| matches!(operation, DeferredOp::Resume(_)))
    }

    pub(crate) fn fetch_parked(&self) -> bool {
        self.deferred
            .iter()
            .any(|operation| matches!(operation, DeferredOp::FetchNote(_)))
    }

    /// Routes a failed remote call
    pub(crate) fn on_remote_failure(
        &mut self,
        failure: RemoteFailure,
        retry: DeferredOp,
    ) -> SyncResult<()> {
        match failure {
            RemoteFailure::RateLimited { seconds } => {
                let cooldown = Cooldown::from_seconds(seconds)?;
                let resume_at = wall_clock(cooldown.resume_at())
                    .ok_or(ResilienceError::DelayOutOfRange(seconds))?;
                warn!(
                    "Rate limit exceeded, resuming in {} seconds",
                    cooldown.seconds()
                );
                let deferred = self.deferred.schedule(retry, cooldown.delay());
                self.outbox.timers.push(deferred);
                self.emit(SyncEvent::RateLimitExceeded {
                    seconds: cooldown.seconds(),
                    resume_at,
                });
                Ok(())
            }
            RemoteFailure::AuthExpired if self.is_linked_notebook_call(&retry) => {
                self.on_linked_notebook_auth_expired();
                Ok(())
            }
            RemoteFailure::AuthExpired => {
                warn!("Authentication expired during {}", self.phase);
                if let DeferredOp::FetchNote(parked) = retry {
                    self.fold_back(parked);
                }
                self.emit(SyncEvent::AuthenticationExpired);
                self.suspend(true);
                Ok(())
            }
            RemoteFailure::Failed(message) => Err(SyncError::Remote(message)),
        }
    }

    fn is_linked_notebook_call(&self, retry: &DeferredOp) -> bool {
        matches!(
            retry,
            DeferredOp::Resume(
                SyncPhase::CheckingLinkedNotebooksState | SyncPhase::DownloadingLinkedNotebookChunks
            )
        )
    }

    /// Runs the current phase until it waits on something
    pub(crate) fn advance(&mut self) -> SyncResult<()> {
        loop {
            if !self.active {
                return Ok(());
            }
            if self.stop_requested {
                if self.tracker.is_empty() {
                    self.finish_stopped();
                }
                return Ok(());
            }
            if self.paused {
                return Ok(());
            }

            let phase = self.phase;
            if self.drive_phase()? {
                self.complete_phase()?;
                continue;
            }
            if self.phase == phase {
                return Ok(());
            }
        }
    }

    /// Does the work of the current phase; returns true once it is settled
    fn drive_phase(&mut self) -> SyncResult<bool> {
        match self.phase {
            SyncPhase::Idle | SyncPhase::Finished => Ok(false),
            SyncPhase::CheckingOwnAccountSyncState => {
                if !self.remote_call_parked() {
                    self.check_own_sync_state()?;
                }
                Ok(false)
            }
            SyncPhase::DownloadingOwnAccountChunks => {
                if !self.remote_call_parked() {
                    self.download_own_chunks()?;
                }
                Ok(false)
            }
            SyncPhase::SyncingOwnAccountContainers => {
                self.dispatch_containers()?;
                Ok(self.containers_settled())
            }
            SyncPhase::SyncingNotes => {
                self.dispatch_notes()?;
                Ok(self.notes_settled())
            }
            SyncPhase::SyncingResources => {
                self.dispatch_resources()?;
                Ok(self.resources_settled())
            }
            SyncPhase::ExpungingOwnAccountDeletions => {
                self.drive_expunges(crate::reconcile::OWN_ACCOUNT_EXPUNGES)
            }
            SyncPhase::ListingAllLinkedNotebooks => Ok(self.drive_listing()),
            SyncPhase::RefreshingLinkedNotebookAuthTokens => self.drive_token_refresh(),
            SyncPhase::CheckingLinkedNotebooksState => {
                if !self.remote_call_parked() {
                    self.check_linked_notebooks_state()?;
                }
                Ok(false)
            }
            SyncPhase::DownloadingLinkedNotebookChunks => {
                if !self.remote_call_parked() {
                    self.download_linked_notebook_chunks()?;
                }
                Ok(false)
            }
            SyncPhase::SyncingLinkedNotebookContainers => {
                self.dispatch_containers()?;
                Ok(self.containers_settled())
            }
            SyncPhase::SyncingLinkedNotebookNotes => {
                self.dispatch_notes()?;
                if !self.notes_settled() {
                    return Ok(false);
                }
                self.dispatch_resources()?;
                Ok(self.resources_settled())
            }
            SyncPhase::ExpungingLinkedNotebookDeletions => {
                self.drive_expunges(crate::reconcile::LINKED_NOTEBOOK_EXPUNGES)
            }
            SyncPhase::ExpungingNotelessLinkedTags => Ok(self.drive_noteless_tags()),
        }
    }

    /// Moves on from a settled phase
    fn complete_phase(&mut self) -> SyncResult<()> {
        match self.phase {
            SyncPhase::SyncingOwnAccountContainers => self.enter_phase(SyncPhase::SyncingNotes),
            SyncPhase::SyncingNotes if self.mode == SyncMode::Incremental => {
                self.enter_phase(SyncPhase::SyncingResources)
            }
            SyncPhase::SyncingNotes | SyncPhase::SyncingResources => {
                self.expunge_step = 0;
                self.enter_phase(SyncPhase::ExpungingOwnAccountDeletions);
            }
            SyncPhase::ExpungingOwnAccountDeletions => self.start_linked_notebooks(),
            SyncPhase::ListingAllLinkedNotebooks if self.linked.all.is_empty() => {
                info!("No linked notebooks");
                self.finish();
            }
            SyncPhase::ListingAllLinkedNotebooks => {
                self.enter_phase(SyncPhase::RefreshingLinkedNotebookAuthTokens)
            }
            SyncPhase::RefreshingLinkedNotebookAuthTokens if self.own_account_changed => {
                self.enter_phase(SyncPhase::DownloadingLinkedNotebookChunks)
            }
            SyncPhase::RefreshingLinkedNotebookAuthTokens => {
                self.enter_phase(SyncPhase::CheckingLinkedNotebooksState)
            }
            SyncPhase::SyncingLinkedNotebookContainers => {
                self.enter_phase(SyncPhase::SyncingLinkedNotebookNotes)
            }
            SyncPhase::SyncingLinkedNotebookNotes => {
                self.expunge_step = 0;
                self.enter_phase(SyncPhase::ExpungingLinkedNotebookDeletions);
            }
            SyncPhase::ExpungingLinkedNotebookDeletions => {
                self.enter_phase(SyncPhase::ExpungingNotelessLinkedTags)
            }
            SyncPhase::ExpungingNotelessLinkedTags => self.finish(),
            other => {
                return Err(SyncError::InvalidData(format!(
                    "phase '{}' cannot complete",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Checks the own account state and picks the download mode
    pub(crate) fn check_own_sync_state(&mut self) -> SyncResult<()> {
        let state = match self.remote.get_account_sync_state() {
            Ok(state) => state,
            Err(failure) => {
                return self.on_remote_failure(failure, DeferredOp::Resume(self.phase));
            }
        };
        self.own.observe_state(&state);

        let bookmarks = self.bookmarks.clone().unwrap_or_default();
        if state.full_sync_before > bookmarks.last_sync_time {
            info!("Server requires a full sync");
            self.mode = SyncMode::Full;
            self.own.after_usn = 0;
            self.last_usn_on_start = 0;
            self.own_account_changed = true;
            self.enter_phase(SyncPhase::DownloadingOwnAccountChunks);
        } else if state.update_count == bookmarks.last_update_count {
            info!("Own account has no updates");
            self.own.complete = true;
            self.own_account_changed = false;
            self.start_linked_notebooks();
        } else {
            self.mode = if self.own.after_usn == 0 {
                SyncMode::Full
            } else {
                SyncMode::Incremental
            };
            self.own_account_changed = true;
            self.enter_phase(SyncPhase::DownloadingOwnAccountChunks);
        }
        Ok(())
    }

    fn finish_stopped(&mut self) {
        info!("Sync stopped");
        self.clear();
        self.active = false;
        self.emit(SyncEvent::Stopped);
    }

    /// Completes the run and publishes the new bookmarks
    pub(crate) fn finish(&mut self) {
        let mut bookmarks = self.bookmarks.clone().unwrap_or_default();
        bookmarks.last_update_count = bookmarks.last_update_count.max(self.own.update_count);
        bookmarks.last_sync_time = bookmarks.last_sync_time.max(self.own.sync_time);

        for (guid, cursor) in &self.linked.cursors {
            if !cursor.complete {
                continue;
            }
            let entry = bookmarks.linked_notebooks.entry(guid.clone()).or_default();
            entry.last_update_count = entry.last_update_count.max(cursor.update_count);
            entry.last_sync_time = entry.last_sync_time.max(cursor.sync_time);
            entry.last_synchronized_usn = entry.last_synchronized_usn.max(cursor.after_usn);
        }

        if self.linked.listed {
            let known: HashSet<&str> = self
                .linked
                .all
                .iter()
                .filter_map(|ln| ln.guid.as_deref())
                .collect();
            bookmarks
                .linked_notebooks
                .retain(|guid, _| known.contains(guid.as_str()));
        }

        let summary = SyncSummary {
            last_update_count: bookmarks.last_update_count,
            last_sync_time: bookmarks.last_sync_time,
            linked_notebook_update_counts: bookmarks
                .linked_notebooks
                .iter()
                .map(|(guid, bookmark)| (guid.clone(), bookmark.last_update_count))
                .collect(),
            linked_notebook_sync_times: bookmarks
                .linked_notebooks
                .iter()
                .map(|(guid, bookmark)| (guid.clone(), bookmark.last_sync_time))
                .collect(),
            bookmarks: bookmarks.clone(),
        };

        self.enter_phase(SyncPhase::Finished);
        info!(
            "Sync finished at update count {}",
            summary.last_update_count
        );
        self.bookmarks = Some(bookmarks);
        self.emit(SyncEvent::Finished(summary));

        self.clear();
        self.phase = SyncPhase::Finished;
        self.active = false;
    }
}

/// Converts a system time to UTC, or `None` outside the calendar range
fn wall_clock(at: SystemTime) -> Option<DateTime<Utc>> {
    let since_epoch = at.duration_since(UNIX_EPOCH).ok()?;
    let secs = i64::try_from(since_epoch.as_secs()).ok()?;
    DateTime::<Utc>::from_timestamp(secs, since_epoch.subsec_nanos())
}
