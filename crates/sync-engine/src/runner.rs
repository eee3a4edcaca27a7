// crates/sync-engine/src/runner.rs
//! Background worker driving a [`SyncEngine`]
//!
//! The engine runs on a blocking worker thread. Commands, storage responses
//! and fired timers all arrive on one channel and are handled in order;
//! events are forwarded to the [`SyncHandle`].

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::events::{SyncCommand, SyncEvent, SyncInput};
use crate::protocol::RemoteSyncClient;
use crate::storage::{LocalStorageService, StorageResponder};
use crate::types::SyncBookmarks;
use log::{debug, info};
use notesync_core::{LinkedNotebookAuth, Usn};
use notesync_resilience::TimerSet;
use std::collections::HashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Spawns sync workers
pub struct SyncRunner;

impl SyncRunner {
    /// Moves the engine and storage onto a worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, S>(engine: SyncEngine<R>, storage: S) -> SyncResult<SyncHandle<R>>
    where
        R: RemoteSyncClient + 'static,
        S: LocalStorageService,
    {
        let runtime = Handle::try_current().map_err(|e| SyncError::Worker(e.to_string()))?;
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let sender = inputs.clone();
        let worker = runtime.spawn_blocking({
            let runtime = runtime.clone();
            move || run_worker(engine, storage, input_rx, sender, event_tx, runtime)
        });

        Ok(SyncHandle {
            inputs,
            events,
            worker,
        })
    }
}

/// Controls a running worker
pub struct SyncHandle<R: RemoteSyncClient + 'static> {
    inputs: UnboundedSender<SyncInput>,
    events: UnboundedReceiver<SyncEvent>,
    worker: JoinHandle<SyncEngine<R>>,
}

impl<R: RemoteSyncClient + 'static> SyncHandle<R> {
    pub fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.inputs
            .send(SyncInput::Command(command))
            .map_err(|_| SyncError::Worker("sync worker has exited".to_string()))
    }

    pub fn start(&self, after_usn: Usn) -> SyncResult<()> {
        self.send(SyncCommand::Start { after_usn })
    }

    pub fn stop(&self) -> SyncResult<()> {
        self.send(SyncCommand::Stop)
    }

    pub fn pause(&self) -> SyncResult<()> {
        self.send(SyncCommand::Pause)
    }

    pub fn resume(&self) -> SyncResult<()> {
        self.send(SyncCommand::Resume)
    }

    pub fn set_last_sync_parameters(&self, bookmarks: SyncBookmarks) -> SyncResult<()> {
        self.send(SyncCommand::SetLastSyncParameters(bookmarks))
    }

    pub fn provide_linked_notebook_auth_tokens(
        &self,
        tokens: HashMap<String, LinkedNotebookAuth>,
    ) -> SyncResult<()> {
        self.send(SyncCommand::LinkedNotebookAuthTokens(tokens))
    }

    pub fn authentication_refreshed(&self) -> SyncResult<()> {
        self.send(SyncCommand::AuthenticationRefreshed)
    }

    /// Waits for the next event; `None` once the worker has exited
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Waits for the worker to exit and returns the engine
    ///
    /// The worker exits after a finished, failed or stopped run.
    pub async fn join(self) -> SyncResult<SyncEngine<R>> {
        self.worker
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))
    }
}

fn run_worker<R, S>(
    mut engine: SyncEngine<R>,
    mut storage: S,
    mut inputs: UnboundedReceiver<SyncInput>,
    sender: UnboundedSender<SyncInput>,
    events: UnboundedSender<SyncEvent>,
    runtime: Handle,
) -> SyncEngine<R>
where
    R: RemoteSyncClient,
    S: LocalStorageService,
{
    let responder = StorageResponder::new(sender.clone());
    let mut timers = TimerSet::new(runtime);
    info!("Sync worker started");

    while let Some(input) = inputs.blocking_recv() {
        if let SyncInput::Timer(token) = &input {
            timers.finished(*token);
        }
        engine.handle(input);

        let outbox = engine.take_outbox();
        for deferred in outbox.timers {
            let token = deferred.token;
            let timer_sender = sender.clone();
            timers.start(token, deferred.delay, move || {
                let _ = timer_sender.send(SyncInput::Timer(token));
            });
        }
        for request in outbox.requests {
            storage.submit(request, responder.clone());
        }

        let mut terminal = false;
        for event in outbox.events {
            terminal |= event.is_terminal();
            if events.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
        if terminal {
            break;
        }
    }

    info!("Sync worker exiting");
    engine
}
