// crates/sync-engine/src/staging.rs
//! Staging lists filled from downloaded chunks
//!
//! Items wait here between download and dispatch. Each list holds at most
//! one version per guid, the one with the highest USN.

use crate::error::{SyncError, SyncResult};
use notesync_core::{
    AnyEntity, Entity, EntityKind, HasGuid, HasUsn, LinkedNotebook, Note, Notebook, Resource,
    SavedSearch, SyncChunk, Tag,
};
use std::collections::HashSet;

/// Guids deleted on the remote side, waiting to be expunged locally
#[derive(Debug, Default)]
pub(crate) struct Expunged {
    pub tags: Vec<String>,
    pub searches: Vec<String>,
    pub notebooks: Vec<String>,
    pub notes: Vec<String>,
    pub linked_notebooks: Vec<String>,
}

impl Expunged {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.searches.is_empty()
            && self.notebooks.is_empty()
            && self.notes.is_empty()
            && self.linked_notebooks.is_empty()
    }
}

/// Downloaded items not yet dispatched
#[derive(Debug, Default)]
pub(crate) struct Staging {
    pub tags: Vec<Tag>,
    pub searches: Vec<SavedSearch>,
    pub notebooks: Vec<Notebook>,
    pub notes: Vec<Note>,
    pub resources: Vec<Resource>,
    pub linked_notebooks: Vec<LinkedNotebook>,
    pub expunged: Expunged,
}

/// Entity kinds that have a staging list
pub(crate) trait Staged: Entity {
    fn list(staging: &mut Staging) -> &mut Vec<Self>;
}

macro_rules! impl_staged {
    ($ty:ident, $field:ident) => {
        impl Staged for $ty {
            fn list(staging: &mut Staging) -> &mut Vec<Self> {
                &mut staging.$field
            }
        }
    };
}

impl_staged!(Tag, tags);
impl_staged!(SavedSearch, searches);
impl_staged!(Notebook, notebooks);
impl_staged!(Note, notes);
impl_staged!(Resource, resources);
impl_staged!(LinkedNotebook, linked_notebooks);

fn non_empty_guid(kind: EntityKind, guid: String) -> SyncResult<String> {
    if guid.trim().is_empty() {
        return Err(SyncError::InvalidData(format!(
            "empty expunged {} guid in sync chunk",
            kind
        )));
    }
    Ok(guid)
}

fn record(list: &mut Vec<String>, guid: String) {
    if !list.contains(&guid) {
        list.push(guid);
    }
}

impl Staging {
    /// Moves the content of a downloaded chunk into the staging lists
    pub fn append_chunk(&mut self, chunk: SyncChunk, include_resources: bool) -> SyncResult<()> {
        let SyncChunk {
            tags,
            notebooks,
            searches,
            notes,
            resources,
            linked_notebooks,
            expunged_tags,
            expunged_notebooks,
            expunged_searches,
            expunged_notes,
            expunged_linked_notebooks,
            ..
        } = chunk;

        for search in searches {
            self.push(search);
        }
        for guid in expunged_searches {
            let guid = non_empty_guid(EntityKind::SavedSearch, guid)?;
            self.discard::<SavedSearch>(&guid);
            record(&mut self.expunged.searches, guid);
        }

        for linked_notebook in linked_notebooks {
            self.push(linked_notebook);
        }
        for guid in expunged_linked_notebooks {
            let guid = non_empty_guid(EntityKind::LinkedNotebook, guid)?;
            self.discard::<LinkedNotebook>(&guid);
            record(&mut self.expunged.linked_notebooks, guid);
        }

        for tag in tags {
            self.push(tag);
        }
        for guid in expunged_tags {
            let guid = non_empty_guid(EntityKind::Tag, guid)?;
            self.discard::<Tag>(&guid);
            record(&mut self.expunged.tags, guid);
        }

        for notebook in notebooks {
            self.push(notebook);
        }
        for guid in expunged_notebooks {
            let guid = non_empty_guid(EntityKind::Notebook, guid)?;
            self.discard::<Notebook>(&guid);
            self.notes
                .retain(|note| note.notebook_guid.as_deref() != Some(guid.as_str()));
            record(&mut self.expunged.notebooks, guid);
        }

        for note in notes {
            let in_expunged_notebook = note
                .notebook_guid
                .as_ref()
                .map(|guid| self.expunged.notebooks.contains(guid))
                .unwrap_or(false);
            if in_expunged_notebook {
                log::debug!("Dropping note {:?} from expunged notebook", note.guid);
                continue;
            }

            // A note that reappears was moved between notebooks, not deleted
            if let Some(guid) = note.guid.as_deref() {
                self.expunged.notes.retain(|expunged| expunged != guid);
            }
            self.push(note);
        }
        for guid in expunged_notes {
            let guid = non_empty_guid(EntityKind::Note, guid)?;
            self.discard::<Note>(&guid);
            record(&mut self.expunged.notes, guid);
        }

        if include_resources {
            for resource in resources {
                self.push(resource);
            }
        }

        Ok(())
    }

    /// Stages an item, keeping only the newest version per guid
    pub fn push<T: Staged>(&mut self, item: T) {
        let list = T::list(self);
        let existing = item
            .guid()
            .and_then(|guid| list.iter().position(|staged| staged.guid() == Some(guid)));

        match existing {
            Some(index) => {
                if item.usn() >= list[index].usn() {
                    list[index] = item;
                }
            }
            None => list.push(item),
        }
    }

    /// Puts a type-erased item back into its list
    pub fn restage(&mut self, item: AnyEntity) {
        match item {
            AnyEntity::Tag(tag) => self.push(tag),
            AnyEntity::SavedSearch(search) => self.push(search),
            AnyEntity::Notebook(notebook) => self.push(notebook),
            AnyEntity::Note(note) => self.push(note),
            AnyEntity::Resource(resource) => self.push(resource),
            AnyEntity::LinkedNotebook(linked_notebook) => self.push(linked_notebook),
        }
    }

    /// Removes a staged item by guid
    pub fn discard<T: Staged>(&mut self, guid: &str) {
        T::list(self).retain(|staged| staged.guid() != Some(guid));
    }

    /// Takes every staged item of a kind
    pub fn take_all<T: Staged>(&mut self) -> Vec<T> {
        std::mem::take(T::list(self))
    }

    /// Takes every staged tag, parents before children
    pub fn take_tags_parents_first(&mut self) -> Vec<Tag> {
        let mut remaining = std::mem::take(&mut self.tags);
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let staged: HashSet<String> = remaining.iter().filter_map(|t| t.guid.clone()).collect();
            let (ready, blocked): (Vec<Tag>, Vec<Tag>) =
                remaining.into_iter().partition(|tag| match tag.parent_guid.as_ref() {
                    Some(parent) => !staged.contains(parent),
                    None => true,
                });

            if ready.is_empty() {
                // Cycle among staged tags
                ordered.extend(blocked);
                break;
            }
            ordered.extend(ready);
            remaining = blocked;
        }

        ordered
    }

    pub fn len_of(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Tag => self.tags.len(),
            EntityKind::SavedSearch => self.searches.len(),
            EntityKind::Notebook => self.notebooks.len(),
            EntityKind::Note => self.notes.len(),
            EntityKind::Resource => self.resources.len(),
            EntityKind::LinkedNotebook => self.linked_notebooks.len(),
        }
    }

    /// Returns true if nothing of the given kinds is staged
    pub fn is_empty_for(&self, kinds: &[EntityKind]) -> bool {
        kinds.iter().all(|kind| self.len_of(*kind) == 0)
    }

    /// Drops every staged item and expunge
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
