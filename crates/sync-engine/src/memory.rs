// crates/sync-engine/src/memory.rs
//! In-memory local storage
//!
//! A complete [`LocalStorageService`] that keeps the replica in plain vectors.
//! Resources live inside their notes. The whole store serializes to JSON, so
//! a replica can be saved between runs.

use crate::error::SyncResult;
use crate::storage::{
    LocalStorageService, StorageOp, StoragePayload, StorageRequest, StorageResponder,
    StorageResponse,
};
use log::{debug, warn};
use notesync_core::{
    AnyEntity, Entity, EntityKind, HasName, LinkedNotebook, LocalId, Note, Notebook, Resource,
    SavedSearch, Tag,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Replica held in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStorage {
    pub tags: Vec<Tag>,
    pub searches: Vec<SavedSearch>,
    pub notebooks: Vec<Notebook>,
    pub notes: Vec<Note>,
    pub linked_notebooks: Vec<LinkedNotebook>,
}

trait Table: Entity {
    fn rows(storage: &MemoryStorage) -> &Vec<Self>;
    fn rows_mut(storage: &mut MemoryStorage) -> &mut Vec<Self>;
}

macro_rules! impl_table {
    ($ty:ident, $field:ident) => {
        impl Table for $ty {
            fn rows(storage: &MemoryStorage) -> &Vec<Self> {
                &storage.$field
            }

            fn rows_mut(storage: &mut MemoryStorage) -> &mut Vec<Self> {
                &mut storage.$field
            }
        }
    };
}

impl_table!(Tag, tags);
impl_table!(SavedSearch, searches);
impl_table!(Notebook, notebooks);
impl_table!(Note, notes);
impl_table!(LinkedNotebook, linked_notebooks);

type OpResult = Result<StoragePayload, String>;

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a replica saved with [`to_json`](Self::to_json)
    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Inserts an item directly, bypassing duplicate checks
    pub fn insert(&mut self, entity: impl Into<AnyEntity>) {
        match entity.into() {
            AnyEntity::Tag(tag) => self.tags.push(tag),
            AnyEntity::SavedSearch(search) => self.searches.push(search),
            AnyEntity::Notebook(notebook) => self.notebooks.push(notebook),
            AnyEntity::Note(note) => self.notes.push(note),
            AnyEntity::LinkedNotebook(linked_notebook) => {
                self.linked_notebooks.push(linked_notebook)
            }
            AnyEntity::Resource(resource) => {
                let owner = self.notes.iter_mut().find(|note| {
                    Some(note.local_id) == resource.note_local_id
                        || (note.guid.is_some() && note.guid == resource.note_guid)
                });
                match owner {
                    Some(note) => note.replace_resource(resource),
                    None => warn!("Dropping resource {:?} without a note", resource.guid),
                }
            }
        }
    }

    pub fn tag(&self, guid: &str) -> Option<&Tag> {
        find(&self.tags, guid)
    }

    pub fn search(&self, guid: &str) -> Option<&SavedSearch> {
        find(&self.searches, guid)
    }

    pub fn notebook(&self, guid: &str) -> Option<&Notebook> {
        find(&self.notebooks, guid)
    }

    pub fn note(&self, guid: &str) -> Option<&Note> {
        find(&self.notes, guid)
    }

    pub fn linked_notebook(&self, guid: &str) -> Option<&LinkedNotebook> {
        find(&self.linked_notebooks, guid)
    }

    pub fn resource(&self, guid: &str) -> Option<&Resource> {
        self.notes.iter().find_map(|note| note.resource(guid))
    }

    /// Notes whose title starts with the given prefix
    pub fn notes_titled(&self, prefix: &str) -> Vec<&Note> {
        self.notes
            .iter()
            .filter(|note| note.title.as_deref().is_some_and(|t| t.starts_with(prefix)))
            .collect()
    }

    /// Total number of stored items, resources included
    pub fn item_count(&self) -> usize {
        self.tags.len()
            + self.searches.len()
            + self.notebooks.len()
            + self.notes.len()
            + self.linked_notebooks.len()
            + self.notes.iter().map(|note| note.resources.len()).sum::<usize>()
    }

    /// Executes one request
    pub fn handle(&mut self, request: StorageRequest) -> StorageResponse {
        let StorageRequest { id, op } = request;
        match self.execute(op.clone()) {
            Ok(payload) => StorageResponse::success(id, payload),
            Err(description) => {
                debug!("Storage request {} failed: {}", id, description);
                StorageResponse::failure(id, op, description)
            }
        }
    }

    fn execute(&mut self, op: StorageOp) -> OpResult {
        match op {
            StorageOp::FindByGuid { kind, guid } => self
                .find_by_guid(kind, &guid)
                .map(StoragePayload::Found)
                .ok_or_else(|| format!("{} {} not found", kind, guid)),
            StorageOp::FindByName {
                kind,
                name,
                linked_notebook_guid,
            } => self
                .find_by_name(kind, &name, linked_notebook_guid.as_deref())
                .map(StoragePayload::Found)
                .ok_or_else(|| format!("no {} named '{}'", kind, name)),
            StorageOp::Add(entity) => self.add(entity).map(StoragePayload::Stored),
            StorageOp::Update(entity) => self.update(entity).map(StoragePayload::Stored),
            StorageOp::Expunge { kind, guid } => {
                self.expunge(kind, &guid);
                Ok(StoragePayload::Expunged)
            }
            StorageOp::ListLinkedNotebooks { limit, offset } => Ok(StoragePayload::LinkedNotebooks(
                self.linked_notebooks
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect(),
            )),
            StorageOp::ExpungeNotelessTagsInLinkedNotebooks => {
                self.expunge_noteless_linked_tags();
                Ok(StoragePayload::NotelessTagsExpunged)
            }
        }
    }

    fn find_by_guid(&self, kind: EntityKind, guid: &str) -> Option<AnyEntity> {
        match kind {
            EntityKind::Tag => find_any(&self.tags, guid),
            EntityKind::SavedSearch => find_any(&self.searches, guid),
            EntityKind::Notebook => find_any(&self.notebooks, guid),
            EntityKind::Note => find_any(&self.notes, guid),
            EntityKind::LinkedNotebook => find_any(&self.linked_notebooks, guid),
            EntityKind::Resource => self.resource(guid).cloned().map(AnyEntity::from),
        }
    }

    fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        linked_notebook_guid: Option<&str>,
    ) -> Option<AnyEntity> {
        match kind {
            EntityKind::Tag => self
                .tags
                .iter()
                .find(|tag| {
                    tag.name_matches(name) && tag.linked_notebook_guid.as_deref() == linked_notebook_guid
                })
                .cloned()
                .map(AnyEntity::from),
            EntityKind::Notebook => self
                .notebooks
                .iter()
                .find(|notebook| {
                    notebook.name_matches(name)
                        && notebook.linked_notebook_guid.as_deref() == linked_notebook_guid
                })
                .cloned()
                .map(AnyEntity::from),
            EntityKind::SavedSearch => self
                .searches
                .iter()
                .find(|search| search.name_matches(name))
                .cloned()
                .map(AnyEntity::from),
            EntityKind::Note | EntityKind::Resource | EntityKind::LinkedNotebook => None,
        }
    }

    fn add(&mut self, entity: AnyEntity) -> Result<AnyEntity, String> {
        match entity {
            AnyEntity::Tag(mut tag) => {
                self.link_tag(&mut tag);
                self.add_row(tag)
            }
            AnyEntity::SavedSearch(search) => self.add_row(search),
            AnyEntity::Notebook(notebook) => self.add_row(notebook),
            AnyEntity::Note(mut note) => {
                self.link_note(&mut note);
                self.add_row(note)
            }
            AnyEntity::LinkedNotebook(linked_notebook) => self.add_row(linked_notebook),
            AnyEntity::Resource(mut resource) => {
                if let Some(guid) = resource.guid.as_deref() {
                    if self.resource(guid).is_some() {
                        return Err(format!("resource {} already exists", guid));
                    }
                }
                let note = self.owner_of(&resource)?;
                resource.note_local_id = Some(note.local_id);
                note.resources.push(resource.clone());
                Ok(resource.into())
            }
        }
    }

    fn update(&mut self, entity: AnyEntity) -> Result<AnyEntity, String> {
        match entity {
            AnyEntity::Tag(mut tag) => {
                self.link_tag(&mut tag);
                self.update_row(tag)
            }
            AnyEntity::SavedSearch(search) => self.update_row(search),
            AnyEntity::Notebook(notebook) => self.update_row(notebook),
            AnyEntity::Note(mut note) => {
                self.link_note(&mut note);
                self.update_row(note)
            }
            AnyEntity::LinkedNotebook(linked_notebook) => self.update_row(linked_notebook),
            AnyEntity::Resource(resource) => {
                let slot = self
                    .notes
                    .iter_mut()
                    .flat_map(|note| note.resources.iter_mut())
                    .find(|existing| existing.local_id == resource.local_id);
                match slot {
                    Some(slot) => {
                        *slot = resource.clone();
                        Ok(resource.into())
                    }
                    None => Err(format!("resource {} not found", resource.local_id)),
                }
            }
        }
    }

    fn add_row<T: Table>(&mut self, item: T) -> Result<AnyEntity, String> {
        if let Some(guid) = item.guid() {
            if T::rows(self).iter().any(|row| row.guid() == Some(guid)) {
                return Err(format!("{} {} already exists", T::KIND, guid));
            }
        }
        T::rows_mut(self).push(item.clone());
        Ok(item.into_any())
    }

    fn update_row<T: Table>(&mut self, item: T) -> Result<AnyEntity, String> {
        let local_id: LocalId = item.local_id();
        match T::rows_mut(self)
            .iter_mut()
            .find(|row| row.local_id() == local_id)
        {
            Some(slot) => {
                *slot = item.clone();
                Ok(item.into_any())
            }
            None => Err(format!("{} {} not found", T::KIND, local_id)),
        }
    }

    fn owner_of(&mut self, resource: &Resource) -> Result<&mut Note, String> {
        self.notes
            .iter_mut()
            .find(|note| {
                Some(note.local_id) == resource.note_local_id
                    || (note.guid.is_some() && note.guid == resource.note_guid)
            })
            .ok_or_else(|| format!("note for resource {:?} not found", resource.guid))
    }

    fn link_tag(&self, tag: &mut Tag) {
        if let Some(parent) = tag.parent_guid.as_deref().and_then(|guid| self.tag(guid)) {
            tag.parent_local_id = Some(parent.local_id);
        }
    }

    fn link_note(&self, note: &mut Note) {
        if let Some(notebook) = note.notebook_guid.as_deref().and_then(|guid| self.notebook(guid)) {
            note.notebook_local_id = Some(notebook.local_id);
        }
        note.tag_local_ids = note
            .tag_guids
            .iter()
            .filter_map(|guid| self.tag(guid).map(|tag| tag.local_id))
            .collect();

        let note_local_id = note.local_id;
        let note_guid = note.guid.clone();
        for resource in &mut note.resources {
            resource.note_local_id = Some(note_local_id);
            if resource.note_guid.is_none() {
                resource.note_guid = note_guid.clone();
            }
        }
    }

    /// Removes an item and everything that depends on it
    fn expunge(&mut self, kind: EntityKind, guid: &str) {
        match kind {
            EntityKind::Tag => {
                self.tags.retain(|tag| tag.guid.as_deref() != Some(guid));
                for tag in &mut self.tags {
                    if tag.parent_guid.as_deref() == Some(guid) {
                        tag.parent_guid = None;
                        tag.parent_local_id = None;
                    }
                }
                for note in &mut self.notes {
                    note.tag_guids.retain(|tag_guid| tag_guid != guid);
                }
            }
            EntityKind::SavedSearch => self.searches.retain(|s| s.guid.as_deref() != Some(guid)),
            EntityKind::Notebook => {
                self.notebooks.retain(|nb| nb.guid.as_deref() != Some(guid));
                self.notes
                    .retain(|note| note.notebook_guid.as_deref() != Some(guid));
            }
            EntityKind::Note => self.notes.retain(|note| note.guid.as_deref() != Some(guid)),
            EntityKind::Resource => {
                for note in &mut self.notes {
                    note.resources.retain(|r| r.guid.as_deref() != Some(guid));
                }
            }
            EntityKind::LinkedNotebook => {
                self.linked_notebooks
                    .retain(|ln| ln.guid.as_deref() != Some(guid));
                self.tags
                    .retain(|tag| tag.linked_notebook_guid.as_deref() != Some(guid));

                let (removed, kept): (Vec<Notebook>, Vec<Notebook>) = std::mem::take(&mut self.notebooks)
                    .into_iter()
                    .partition(|nb| nb.linked_notebook_guid.as_deref() == Some(guid));
                self.notebooks = kept;
                for notebook in removed {
                    if let Some(notebook_guid) = notebook.guid {
                        self.notes
                            .retain(|note| note.notebook_guid.as_deref() != Some(&notebook_guid));
                    }
                }
            }
        }
    }

    fn expunge_noteless_linked_tags(&mut self) {
        let notes = &self.notes;
        let before = self.tags.len();
        self.tags.retain(|tag| {
            if tag.linked_notebook_guid.is_none() {
                return true;
            }
            notes.iter().any(|note| {
                note.tag_local_ids.contains(&tag.local_id)
                    || tag
                        .guid
                        .as_ref()
                        .is_some_and(|guid| note.tag_guids.contains(guid))
            })
        });
        debug!("Expunged {} noteless linked tags", before - self.tags.len());
    }
}

fn find<'a, T: Entity>(rows: &'a [T], guid: &str) -> Option<&'a T> {
    rows.iter().find(|row| row.guid() == Some(guid))
}

fn find_any<T: Entity>(rows: &[T], guid: &str) -> Option<AnyEntity> {
    find(rows, guid).cloned().map(Entity::into_any)
}

impl LocalStorageService for MemoryStorage {
    fn submit(&mut self, request: StorageRequest, responder: StorageResponder) {
        let response = self.handle(request);
        if !responder.respond(response) {
            debug!("Sync engine is gone, dropping storage response");
        }
    }
}

impl LocalStorageService for Arc<Mutex<MemoryStorage>> {
    fn submit(&mut self, request: StorageRequest, responder: StorageResponder) {
        let response = match self.lock() {
            Ok(mut storage) => storage.handle(request),
            Err(_) => StorageResponse::failure(request.id, request.op, "storage lock poisoned"),
        };
        if !responder.respond(response) {
            debug!("Sync engine is gone, dropping storage response");
        }
    }
}
