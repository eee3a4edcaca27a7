// crates/sync-engine/src/reconcile.rs
//! Dispatch of staged items and reconciliation with local duplicates
//!
//! Every staged item goes through the same path: find the local copy by
//! guid, fall back to a name lookup for containers, then add, update or
//! clone-on-conflict. Notes additionally need their full content from the
//! remote and a resolved notebook before they can be stored.

use crate::conflict::{
    accept_remote, conflict_name, decide, detach, detach_note, resource_conflict_note_name,
    MergeDecision,
};
use crate::engine::{DeferredOp, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::protocol::RemoteSyncClient;
use crate::staging::Staged;
use crate::storage::{StorageFailure, StorageOp, StoragePayload, StorageRequest};
use crate::tracker::Pending;
use crate::types::OperationKind;
use chrono::Utc;
use log::{debug, info};
use notesync_core::{
    AnyEntity, Entity, EntityKind, HasName, LinkedNotebook, LinkedNotebookOwned, LocalId, Note,
    Notebook, Resource, SavedSearch,
};

const CONTAINER_KINDS: [EntityKind; 4] = [
    EntityKind::SavedSearch,
    EntityKind::LinkedNotebook,
    EntityKind::Tag,
    EntityKind::Notebook,
];

/// Group of expunges sent together; the next group waits for this one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpungeStep {
    Notes,
    Notebooks,
    SavedSearchesAndTags,
    LinkedNotebooks,
    Tags,
}

pub(crate) const OWN_ACCOUNT_EXPUNGES: &[ExpungeStep] = &[
    ExpungeStep::Notes,
    ExpungeStep::Notebooks,
    ExpungeStep::SavedSearchesAndTags,
    ExpungeStep::LinkedNotebooks,
];

pub(crate) const LINKED_NOTEBOOK_EXPUNGES: &[ExpungeStep] = &[
    ExpungeStep::Notes,
    ExpungeStep::Notebooks,
    ExpungeStep::Tags,
];

/// A remote item being reconciled
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Claim {
    kind: EntityKind,
    guid: String,
}

impl Claim {
    fn of<T: Entity>(item: &T) -> SyncResult<Self> {
        let guid = item.guid().ok_or(SyncError::MissingGuid(T::KIND))?;
        Ok(Self {
            kind: T::KIND,
            guid: guid.to_string(),
        })
    }
}

/// How a fully downloaded note is stored
#[derive(Debug)]
pub(crate) enum NoteIntent {
    Add,
    Update { local: Note, conflict: bool },
}

/// Note waiting for its full content
#[derive(Debug)]
pub(crate) struct ParkedNote {
    pub note: Note,
    pub intent: NoteIntent,
}

/// Note pair produced by conflicting resources, waiting for its notebook
///
/// Every conflicting resource of one note lands in the same pair.
#[derive(Debug)]
pub(crate) struct ResourceConflict {
    conflicted: Note,
    updated: Note,
    claims: Vec<Claim>,
}

/// What to do once a storage response arrives
#[derive(Debug)]
pub(crate) enum PendingContext {
    FindByGuid {
        item: AnyEntity,
    },
    FindByName {
        item: AnyEntity,
    },
    NotebookForNote {
        parked: ParkedNote,
    },
    NoteForResource {
        resource: Resource,
        local: Option<Resource>,
    },
    NotebookForConflictedResource {
        notebook_guid: String,
    },
    Add {
        claims: Vec<Claim>,
    },
    Update {
        claims: Vec<Claim>,
    },
    Expunge {
        guid: String,
    },
    ListLinkedNotebooks {
        limit: u32,
    },
    ExpungeNotelessTags,
}

/// Gives a remote item a fresh local identity
fn fresh_copy<T: Entity>(mut item: T) -> T {
    item.set_local_id(LocalId::new());
    item.set_dirty(false);
    item.set_local(false);
    item
}

fn fresh(item: AnyEntity) -> AnyEntity {
    match item {
        AnyEntity::Tag(tag) => fresh_copy(tag).into(),
        AnyEntity::SavedSearch(search) => fresh_copy(search).into(),
        AnyEntity::Notebook(notebook) => fresh_copy(notebook).into(),
        AnyEntity::Note(note) => fresh_copy(note).into(),
        AnyEntity::Resource(resource) => fresh_copy(resource).into(),
        AnyEntity::LinkedNotebook(linked_notebook) => fresh_copy(linked_notebook).into(),
    }
}

/// Points the resources of a note at it, reusing local resource identities
fn bind_resources(note: &mut Note, local: Option<&Note>) {
    let note_guid = note.guid.clone();
    let note_local_id = note.local_id;

    for resource in &mut note.resources {
        let existing = local.and_then(|local| {
            resource
                .guid
                .as_deref()
                .and_then(|guid| local.resource(guid))
        });
        if let Some(existing) = existing {
            resource.local_id = existing.local_id;
        }
        resource.note_guid = note_guid.clone();
        resource.note_local_id = Some(note_local_id);
        resource.dirty = false;
        resource.local = false;
    }
}

fn unexpected(kind: EntityKind, operation: OperationKind) -> SyncError {
    SyncError::InvalidData(format!(
        "unexpected storage payload for {:?} {}",
        operation, kind
    ))
}

fn storage_failure(kind: EntityKind, operation: OperationKind, failure: StorageFailure) -> SyncError {
    SyncError::Storage(format!(
        "{:?} {} failed: {}",
        operation, kind, failure.description
    ))
}

impl<R: RemoteSyncClient> SyncEngine<R> {
    pub(crate) fn request(&mut self, op: StorageOp, context: PendingContext) {
        let id = self.tracker.register(op.kind(), op.operation(), context);
        debug!("Storage request {}: {:?} {}", id, op.operation(), op.kind());
        self.outbox.requests.push(StorageRequest { id, op });
    }

    fn add(&mut self, entity: AnyEntity, claim: Option<Claim>) {
        let claims = claim.into_iter().collect();
        self.request(StorageOp::Add(entity), PendingContext::Add { claims });
    }

    fn update(&mut self, entity: AnyEntity, claim: Option<Claim>) {
        self.update_claiming(entity, claim.into_iter().collect());
    }

    fn update_claiming(&mut self, entity: AnyEntity, claims: Vec<Claim>) {
        self.request(StorageOp::Update(entity), PendingContext::Update { claims });
    }

    fn release(&mut self, claim: &Claim) {
        self.tracker.release(claim.kind, &claim.guid);
    }

    /// Puts an item back into staging after an interrupted round trip
    fn restage(&mut self, item: AnyEntity) {
        if let Some(guid) = item.guid() {
            self.tracker.release(item.kind(), guid);
        }
        if item.kind() == EntityKind::Note {
            self.notes_total = self.notes_total.saturating_sub(1);
        }
        self.staging.restage(item);
    }

    pub(crate) fn fold_back(&mut self, parked: ParkedNote) {
        debug!("Restaging note {:?}", parked.note.guid);
        self.restage(parked.note.into());
    }

    // ---- dispatch ----

    fn dispatch_items<T: Staged>(&mut self, items: Vec<T>) -> SyncResult<()> {
        for item in items {
            let guid = item
                .guid()
                .ok_or(SyncError::MissingGuid(T::KIND))?
                .to_string();
            if item.usn().is_none() {
                return Err(SyncError::MissingUsn {
                    kind: T::KIND,
                    guid,
                });
            }
            if !self.tracker.claim(T::KIND, &guid) {
                debug!("{} {} already in flight, keeping it staged", T::KIND, guid);
                self.staging.push(item);
                continue;
            }

            if T::KIND == EntityKind::Note {
                self.notes_total += 1;
            }
            self.request(
                StorageOp::FindByGuid {
                    kind: T::KIND,
                    guid,
                },
                PendingContext::FindByGuid {
                    item: item.into_any(),
                },
            );
        }
        Ok(())
    }

    /// Sends searches, linked notebooks, tags (parents first) and notebooks
    pub(crate) fn dispatch_containers(&mut self) -> SyncResult<()> {
        let searches = self.staging.take_all::<SavedSearch>();
        self.dispatch_items(searches)?;
        let linked_notebooks = self.staging.take_all::<LinkedNotebook>();
        self.dispatch_items(linked_notebooks)?;
        let tags = self.staging.take_tags_parents_first();
        self.dispatch_items(tags)?;
        let notebooks = self.staging.take_all::<Notebook>();
        self.dispatch_items(notebooks)
    }

    pub(crate) fn containers_settled(&self) -> bool {
        self.staging.is_empty_for(&CONTAINER_KINDS) && self.tracker.is_settled(&CONTAINER_KINDS)
    }

    pub(crate) fn dispatch_notes(&mut self) -> SyncResult<()> {
        let notes = self.staging.take_all::<Note>();
        self.dispatch_items(notes)
    }

    pub(crate) fn notes_settled(&self) -> bool {
        self.staging.is_empty_for(&[EntityKind::Note])
            && self
                .tracker
                .is_settled(&[EntityKind::Note, EntityKind::Notebook])
            && !self.fetch_parked()
    }

    pub(crate) fn dispatch_resources(&mut self) -> SyncResult<()> {
        let resources = self.staging.take_all::<Resource>();
        self.dispatch_items(resources)?;
        self.flush_ready_resource_conflicts();
        Ok(())
    }

    pub(crate) fn resources_settled(&self) -> bool {
        self.staging.is_empty_for(&[EntityKind::Resource])
            && self.tracker.is_settled(&[
                EntityKind::Resource,
                EntityKind::Note,
                EntityKind::Notebook,
            ])
            && self.resource_conflicts.is_empty()
            && self.conflict_notebook_lookups.is_empty()
            && !self.fetch_parked()
    }

    /// Sends one group of expunges at a time; true once all are done
    pub(crate) fn drive_expunges(&mut self, steps: &[ExpungeStep]) -> SyncResult<bool> {
        while !self.tracker.has_operation(OperationKind::Expunge) {
            let Some(step) = steps.get(self.expunge_step).copied() else {
                return Ok(true);
            };
            self.expunge_step += 1;

            for (kind, guid) in self.take_expunges(step) {
                self.request(
                    StorageOp::Expunge {
                        kind,
                        guid: guid.clone(),
                    },
                    PendingContext::Expunge { guid },
                );
            }
        }
        Ok(false)
    }

    fn take_expunges(&mut self, step: ExpungeStep) -> Vec<(EntityKind, String)> {
        let expunged = &mut self.staging.expunged;
        let tagged = |kind: EntityKind, guids: Vec<String>| {
            guids.into_iter().map(move |guid| (kind, guid))
        };

        match step {
            ExpungeStep::Notes => tagged(EntityKind::Note, std::mem::take(&mut expunged.notes)).collect(),
            ExpungeStep::Notebooks => {
                tagged(EntityKind::Notebook, std::mem::take(&mut expunged.notebooks)).collect()
            }
            ExpungeStep::SavedSearchesAndTags => {
                tagged(EntityKind::SavedSearch, std::mem::take(&mut expunged.searches))
                    .chain(tagged(EntityKind::Tag, std::mem::take(&mut expunged.tags)))
                    .collect()
            }
            ExpungeStep::LinkedNotebooks => tagged(
                EntityKind::LinkedNotebook,
                std::mem::take(&mut expunged.linked_notebooks),
            )
            .collect(),
            ExpungeStep::Tags => tagged(EntityKind::Tag, std::mem::take(&mut expunged.tags)).collect(),
        }
    }

    // ---- responses ----

    pub(crate) fn handle_response(
        &mut self,
        pending: Pending<PendingContext>,
        result: Result<StoragePayload, StorageFailure>,
    ) -> SyncResult<()> {
        let Pending {
            kind,
            operation,
            context,
        } = pending;

        if self.stop_requested {
            return Ok(());
        }

        match context {
            PendingContext::FindByGuid { item } => {
                if self.paused {
                    self.restage(item);
                    return Ok(());
                }
                match result {
                    Ok(StoragePayload::Found(local)) => self.on_found_by_guid(item, local),
                    Ok(_) => Err(unexpected(kind, operation)),
                    Err(_) => self.on_not_found_by_guid(item),
                }
            }
            PendingContext::FindByName { item } => {
                if self.paused {
                    self.restage(item);
                    return Ok(());
                }
                match result {
                    Ok(StoragePayload::Found(local)) => self.on_found_by_name(item, local),
                    Ok(_) => Err(unexpected(kind, operation)),
                    Err(_) => self.add_new(item),
                }
            }
            PendingContext::NotebookForNote { parked } => {
                if self.paused {
                    self.fold_back(parked);
                    return Ok(());
                }
                match result {
                    Ok(StoragePayload::Found(AnyEntity::Notebook(notebook))) => {
                        self.cache_notebook(notebook);
                        self.fetch_full_note(parked)
                    }
                    Ok(_) => Err(unexpected(kind, operation)),
                    Err(_) => Err(SyncError::OwnerNotFound {
                        kind: EntityKind::Note,
                        guid: parked.note.guid.clone().unwrap_or_default(),
                        owner: EntityKind::Notebook,
                        owner_guid: parked.note.notebook_guid.clone().unwrap_or_default(),
                    }),
                }
            }
            PendingContext::NoteForResource { resource, local } => {
                if self.paused {
                    self.restage(resource.into());
                    return Ok(());
                }
                match result {
                    Ok(StoragePayload::Found(AnyEntity::Note(note))) => {
                        self.on_note_for_resource(resource, local, note)
                    }
                    Ok(_) => Err(unexpected(kind, operation)),
                    Err(_) => Err(SyncError::OwnerNotFound {
                        kind: EntityKind::Resource,
                        guid: resource.guid.clone().unwrap_or_default(),
                        owner: EntityKind::Note,
                        owner_guid: resource.note_guid.clone().unwrap_or_default(),
                    }),
                }
            }
            PendingContext::NotebookForConflictedResource { notebook_guid } => {
                self.conflict_notebook_lookups.remove(&notebook_guid);
                let Some(first_note) = self.resource_conflicts.get(&notebook_guid).map(|waiting| {
                    waiting
                        .first()
                        .and_then(|pending| pending.updated.guid.clone())
                        .unwrap_or_default()
                }) else {
                    return Err(SyncError::MissingContext(format!(
                        "no conflicted resources wait for notebook {}",
                        notebook_guid
                    )));
                };
                match result {
                    Ok(StoragePayload::Found(AnyEntity::Notebook(notebook))) => {
                        self.cache_notebook(notebook);
                        Ok(())
                    }
                    Ok(_) => Err(unexpected(kind, operation)),
                    Err(_) => Err(SyncError::OwnerNotFound {
                        kind: EntityKind::Note,
                        guid: first_note,
                        owner: EntityKind::Notebook,
                        owner_guid: notebook_guid,
                    }),
                }
            }
            PendingContext::Add { claims } | PendingContext::Update { claims } => {
                match result {
                    Ok(StoragePayload::Stored(entity)) => self.on_stored(entity),
                    Ok(_) => return Err(unexpected(kind, operation)),
                    Err(failure) => return Err(storage_failure(kind, operation, failure)),
                }
                for claim in &claims {
                    self.release(claim);
                }
                Ok(())
            }
            PendingContext::Expunge { guid } => match result {
                Ok(_) => {
                    debug!("Expunged {} {}", kind, guid);
                    Ok(())
                }
                Err(failure) => Err(storage_failure(kind, operation, failure)),
            },
            PendingContext::ListLinkedNotebooks { limit } => match result {
                Ok(StoragePayload::LinkedNotebooks(page)) => {
                    self.on_linked_notebooks_page(page, limit);
                    Ok(())
                }
                Ok(_) => Err(unexpected(kind, operation)),
                Err(failure) => Err(storage_failure(kind, operation, failure)),
            },
            PendingContext::ExpungeNotelessTags => match result {
                Ok(_) => {
                    self.linked.noteless_tags_expunged = true;
                    Ok(())
                }
                Err(failure) => Err(storage_failure(kind, operation, failure)),
            },
        }
    }

    fn cache_notebook(&mut self, notebook: Notebook) {
        if let Some(guid) = notebook.guid.clone() {
            self.notebooks_by_guid.insert(guid, notebook);
        }
    }

    fn on_stored(&mut self, entity: AnyEntity) {
        debug!("Stored {} {:?}", entity.kind(), entity.guid());
        match entity {
            AnyEntity::Notebook(notebook) => self.cache_notebook(notebook),
            AnyEntity::LinkedNotebook(linked_notebook) if self.linked.listed => {
                let all = &mut self.linked.all;
                match all.iter_mut().find(|ln| ln.local_id == linked_notebook.local_id) {
                    Some(slot) => *slot = linked_notebook,
                    None => all.push(linked_notebook),
                }
            }
            _ => {}
        }
    }

    fn owner_of(&self, item: &AnyEntity) -> Option<String> {
        item.guid()
            .and_then(|guid| self.linked.ownership.get(guid))
            .cloned()
    }

    /// Binds linked notebook tags and notebooks to their owner
    fn bind_owner(&self, mut item: AnyEntity) -> AnyEntity {
        if let Some(owner) = self.owner_of(&item) {
            match &mut item {
                AnyEntity::Tag(tag) => tag.set_linked_notebook_guid(Some(owner)),
                AnyEntity::Notebook(notebook) => notebook.set_linked_notebook_guid(Some(owner)),
                _ => {}
            }
        }
        item
    }

    fn add_new(&mut self, item: AnyEntity) -> SyncResult<()> {
        let kind = item.kind();
        let guid = item.guid().ok_or(SyncError::MissingGuid(kind))?.to_string();
        debug!("Adding new {} {}", kind, guid);
        let item = self.bind_owner(fresh(item));
        self.add(item, Some(Claim { kind, guid }));
        Ok(())
    }

    fn on_found_by_guid(&mut self, item: AnyEntity, local: AnyEntity) -> SyncResult<()> {
        match item {
            AnyEntity::Tag(remote) => self.reconcile_container(remote, local.downcast()?),
            AnyEntity::SavedSearch(remote) => self.reconcile_container(remote, local.downcast()?),
            AnyEntity::Notebook(remote) => self.reconcile_container(remote, local.downcast()?),
            AnyEntity::LinkedNotebook(remote) => {
                self.reconcile_linked_notebook(remote, local.downcast()?)
            }
            AnyEntity::Note(remote) => self.reconcile_note(remote, local.downcast()?),
            AnyEntity::Resource(remote) => self.reconcile_resource(remote, local.downcast()?),
        }
    }

    fn on_not_found_by_guid(&mut self, item: AnyEntity) -> SyncResult<()> {
        match item {
            AnyEntity::Tag(_) | AnyEntity::SavedSearch(_) | AnyEntity::Notebook(_) => {
                let Some(name) = item.name().map(str::to_string) else {
                    return self.add_new(item);
                };
                let linked_notebook_guid = self.owner_of(&item);
                self.request(
                    StorageOp::FindByName {
                        kind: item.kind(),
                        name,
                        linked_notebook_guid,
                    },
                    PendingContext::FindByName { item },
                );
                Ok(())
            }
            AnyEntity::LinkedNotebook(_) => self.add_new(item),
            AnyEntity::Note(note) => self.fetch_full_note(ParkedNote {
                note,
                intent: NoteIntent::Add,
            }),
            AnyEntity::Resource(resource) => {
                let note_guid = resource.note_guid.clone().ok_or_else(|| SyncError::MissingOwner {
                    kind: EntityKind::Resource,
                    guid: resource.guid.clone().unwrap_or_default(),
                    owner: EntityKind::Note,
                })?;
                self.request(
                    StorageOp::FindByGuid {
                        kind: EntityKind::Note,
                        guid: note_guid,
                    },
                    PendingContext::NoteForResource {
                        resource,
                        local: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// A local item may be matched by name only once per run
    fn on_found_by_name(&mut self, item: AnyEntity, local: AnyEntity) -> SyncResult<()> {
        if !self.attempted_by_name.insert(local.local_id()) {
            debug!(
                "{} {:?} matched a local item by name only, adding it as new",
                item.kind(),
                item.guid()
            );
            return self.add_new(item);
        }

        match item {
            AnyEntity::Tag(remote) => self.reconcile_container(remote, local.downcast()?),
            AnyEntity::SavedSearch(remote) => self.reconcile_container(remote, local.downcast()?),
            AnyEntity::Notebook(remote) => self.reconcile_container(remote, local.downcast()?),
            other => self.add_new(other),
        }
    }

    fn reconcile_container<T: Entity + HasName>(&mut self, remote: T, local: T) -> SyncResult<()> {
        let claim = Claim::of(&remote)?;
        match decide(&remote, &local)? {
            MergeDecision::KeepLocal => {
                debug!("{} {} is up to date locally", T::KIND, claim.guid);
                self.release(&claim);
            }
            MergeDecision::AcceptRemote => {
                let merged = self.bind_owner(accept_remote(remote, &local).into_any());
                self.update(merged, Some(claim));
            }
            MergeDecision::Conflict => {
                info!("{} {} was modified on both sides", T::KIND, claim.guid);
                let clone = detach(&local, conflict_name(T::KIND, local.name(), Utc::now()));
                self.add(clone.into_any(), None);
                let merged = self.bind_owner(accept_remote(remote, &local).into_any());
                self.update(merged, Some(claim));
            }
        }
        Ok(())
    }

    fn reconcile_linked_notebook(
        &mut self,
        remote: LinkedNotebook,
        local: LinkedNotebook,
    ) -> SyncResult<()> {
        let claim = Claim::of(&remote)?;
        match decide(&remote, &local)? {
            MergeDecision::KeepLocal => self.release(&claim),
            MergeDecision::AcceptRemote | MergeDecision::Conflict => {
                self.update(accept_remote(remote, &local).into_any(), Some(claim));
            }
        }
        Ok(())
    }

    fn note_processed(&mut self) {
        self.notes_processed += 1;
        self.emit(SyncEvent::NotesDownloadProgress {
            downloaded: self.notes_processed,
            total: self.notes_total.max(self.notes_processed),
        });
    }

    fn reconcile_note(&mut self, remote: Note, local: Note) -> SyncResult<()> {
        let claim = Claim::of(&remote)?;
        let decision = decide(&remote, &local)?;
        if decision == MergeDecision::KeepLocal {
            debug!("Note {} is up to date locally", claim.guid);
            self.release(&claim);
            self.note_processed();
            return Ok(());
        }

        let notebook_guid = remote
            .notebook_guid
            .clone()
            .or_else(|| local.notebook_guid.clone())
            .ok_or_else(|| SyncError::MissingOwner {
                kind: EntityKind::Note,
                guid: claim.guid.clone(),
                owner: EntityKind::Notebook,
            })?;
        let parked = ParkedNote {
            note: remote,
            intent: NoteIntent::Update {
                local,
                conflict: decision == MergeDecision::Conflict,
            },
        };

        if self.notebooks_by_guid.contains_key(&notebook_guid) {
            self.fetch_full_note(parked)
        } else {
            self.request(
                StorageOp::FindByGuid {
                    kind: EntityKind::Notebook,
                    guid: notebook_guid,
                },
                PendingContext::NotebookForNote { parked },
            );
            Ok(())
        }
    }

    /// Downloads the full note, parking it behind a rate limit if needed
    pub(crate) fn fetch_full_note(&mut self, parked: ParkedNote) -> SyncResult<()> {
        let guid = parked
            .note
            .guid
            .clone()
            .ok_or(SyncError::MissingGuid(EntityKind::Note))?;

        match self.remote.get_full_note(&guid, true) {
            Ok(full) => self.complete_note(full, parked.intent),
            Err(failure) => self.on_remote_failure(failure, DeferredOp::FetchNote(parked)),
        }
    }

    fn attach_notebook(&self, note: &mut Note) {
        if let Some(notebook) = note
            .notebook_guid
            .as_deref()
            .and_then(|guid| self.notebooks_by_guid.get(guid))
        {
            note.notebook_local_id = Some(notebook.local_id);
        }
    }

    fn complete_note(&mut self, full: Note, intent: NoteIntent) -> SyncResult<()> {
        let claim = Claim::of(&full)?;
        self.note_processed();

        match intent {
            NoteIntent::Add => {
                let mut note = fresh_copy(full);
                self.attach_notebook(&mut note);
                bind_resources(&mut note, None);
                self.add(note.into(), Some(claim));
            }
            NoteIntent::Update { local, conflict } => {
                if conflict {
                    info!("Note {} was modified on both sides", claim.guid);
                    let title = conflict_name(EntityKind::Note, local.name(), Utc::now());
                    self.add(detach_note(&local, title).into(), None);
                }
                let mut merged = accept_remote(full, &local);
                self.attach_notebook(&mut merged);
                bind_resources(&mut merged, Some(&local));
                self.update(merged.into(), Some(claim));
            }
        }
        Ok(())
    }

    fn reconcile_resource(&mut self, remote: Resource, local: Resource) -> SyncResult<()> {
        let claim = Claim::of(&remote)?;
        match decide(&remote, &local)? {
            MergeDecision::KeepLocal => self.release(&claim),
            MergeDecision::AcceptRemote => {
                let mut merged = accept_remote(remote, &local);
                if merged.note_local_id.is_none() {
                    merged.note_local_id = local.note_local_id;
                }
                self.update(merged.into(), Some(claim));
            }
            MergeDecision::Conflict => {
                let note_guid = remote
                    .note_guid
                    .clone()
                    .or_else(|| local.note_guid.clone())
                    .ok_or_else(|| SyncError::MissingOwner {
                        kind: EntityKind::Resource,
                        guid: claim.guid.clone(),
                        owner: EntityKind::Note,
                    })?;
                self.request(
                    StorageOp::FindByGuid {
                        kind: EntityKind::Note,
                        guid: note_guid,
                    },
                    PendingContext::NoteForResource {
                        resource: remote,
                        local: Some(local),
                    },
                );
            }
        }
        Ok(())
    }

    fn on_note_for_resource(
        &mut self,
        resource: Resource,
        local: Option<Resource>,
        note: Note,
    ) -> SyncResult<()> {
        let claim = Claim::of(&resource)?;

        let Some(local_resource) = local else {
            let mut resource = fresh_copy(resource);
            if note.guid.is_some() {
                resource.note_guid = note.guid.clone();
            }
            resource.note_local_id = Some(note.local_id);
            self.add(resource.into(), Some(claim));
            return Ok(());
        };

        let notebook_guid = note
            .notebook_guid
            .clone()
            .ok_or_else(|| SyncError::MissingOwner {
                kind: EntityKind::Note,
                guid: note.guid.clone().unwrap_or_default(),
                owner: EntityKind::Notebook,
            })?;
        info!("Resource {} was modified on both sides", claim.guid);

        let mut merged = accept_remote(resource, &local_resource);
        merged.note_guid = note.guid.clone();
        merged.note_local_id = Some(note.local_id);

        let waiting = self.resource_conflicts.entry(notebook_guid.clone()).or_default();
        match waiting
            .iter_mut()
            .find(|pending| pending.updated.local_id == note.local_id)
        {
            Some(pending) => {
                pending.updated.replace_resource(merged);
                pending.claims.push(claim);
            }
            None => {
                let title = resource_conflict_note_name(note.title.as_deref(), Utc::now());
                let conflicted = detach_note(&note, title);
                let mut updated = note;
                updated.replace_resource(merged);
                waiting.push(ResourceConflict {
                    conflicted,
                    updated,
                    claims: vec![claim],
                });
            }
        }

        if !self.notebooks_by_guid.contains_key(&notebook_guid)
            && self.conflict_notebook_lookups.insert(notebook_guid.clone())
        {
            self.request(
                StorageOp::FindByGuid {
                    kind: EntityKind::Notebook,
                    guid: notebook_guid.clone(),
                },
                PendingContext::NotebookForConflictedResource { notebook_guid },
            );
        }
        Ok(())
    }

    /// Stores conflicted resource note pairs whose notebook is known
    ///
    /// Waits until no resource or note lookup is in flight, so each note
    /// collects all of its conflicting resources first.
    fn flush_ready_resource_conflicts(&mut self) {
        let lookups_in_flight = [EntityKind::Resource, EntityKind::Note]
            .into_iter()
            .any(|kind| self.tracker.pending_count(kind, OperationKind::FindByGuid) > 0);
        if lookups_in_flight {
            return;
        }

        let ready: Vec<String> = self
            .resource_conflicts
            .keys()
            .filter(|guid| self.notebooks_by_guid.contains_key(guid.as_str()))
            .cloned()
            .collect();

        for notebook_guid in ready {
            let notebook_local_id = self
                .notebooks_by_guid
                .get(&notebook_guid)
                .map(|notebook| notebook.local_id);
            let waiting = self
                .resource_conflicts
                .remove(&notebook_guid)
                .unwrap_or_default();

            for pending in waiting {
                let ResourceConflict {
                    mut conflicted,
                    mut updated,
                    claims,
                } = pending;
                conflicted.notebook_local_id = notebook_local_id;
                updated.notebook_local_id = notebook_local_id.or(updated.notebook_local_id);
                self.add(conflicted.into(), None);
                self.update_claiming(updated.into(), claims);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_core::Tag;

    #[test]
    fn test_fresh_copy_gets_new_identity() {
        let mut tag = Tag::new("t").with_guid("g1", 2);
        tag.dirty = true;
        let copy = fresh_copy(tag.clone());
        assert_ne!(copy.local_id, tag.local_id);
        assert_eq!(copy.guid, tag.guid);
        assert!(!copy.dirty);
    }

    #[test]
    fn test_bind_resources_reuses_local_ids() {
        let mut local = Note::new("n", "nb").with_guid("n1", 3);
        local
            .resources
            .push(Resource::new("image/png").with_guid("r1", 2));

        let mut remote = Note::new("n", "nb").with_guid("n1", 5);
        remote
            .resources
            .push(Resource::new("image/png").with_guid("r1", 4));
        remote
            .resources
            .push(Resource::new("text/plain").with_guid("r2", 5));
        let mut merged = accept_remote(remote, &local);

        bind_resources(&mut merged, Some(&local));
        assert_eq!(merged.resources[0].local_id, local.resources[0].local_id);
        assert_eq!(merged.resources[1].note_local_id, Some(local.local_id));
        assert_eq!(merged.resources[1].note_guid.as_deref(), Some("n1"));
    }

    #[test]
    fn test_claim_requires_guid() {
        let err = Claim::of(&Tag::new("t")).unwrap_err();
        assert!(matches!(err, SyncError::MissingGuid(EntityKind::Tag)));
    }
}
