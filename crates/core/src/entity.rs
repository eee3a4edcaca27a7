//! Capability traits shared by every synchronizable entity
//!
//! The reconciler operates purely over these traits; entity-specific
//! behavior lives in small hook implementations next to each type.

use crate::error::{EntityError, EntityResult};
use crate::types::{
    LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch, Tag, Usn, Validator,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a synchronizable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Tag,
    SavedSearch,
    Notebook,
    Note,
    Resource,
    LinkedNotebook,
}

impl EntityKind {
    /// All kinds, parents before children
    pub const ALL: [EntityKind; 6] = [
        EntityKind::LinkedNotebook,
        EntityKind::SavedSearch,
        EntityKind::Tag,
        EntityKind::Notebook,
        EntityKind::Note,
        EntityKind::Resource,
    ];

    /// Human readable name used in logs and conflict names
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tag => "tag",
            EntityKind::SavedSearch => "saved search",
            EntityKind::Notebook => "notebook",
            EntityKind::Note => "note",
            EntityKind::Resource => "resource",
            EntityKind::LinkedNotebook => "linked notebook",
        }
    }

    /// Returns true if local storage can look this kind up by name
    pub fn supports_find_by_name(&self) -> bool {
        matches!(
            self,
            EntityKind::Tag | EntityKind::SavedSearch | EntityKind::Notebook
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server and client identity of an entity
pub trait HasGuid {
    fn guid(&self) -> Option<&str>;
    fn set_guid(&mut self, guid: Option<String>);
    fn local_id(&self) -> LocalId;
    fn set_local_id(&mut self, local_id: LocalId);
}

/// Server version of an entity
pub trait HasUsn {
    fn usn(&self) -> Option<Usn>;
    fn set_usn(&mut self, usn: Option<Usn>);
}

/// Local modification flags
pub trait DirtyTrackable {
    fn is_dirty(&self) -> bool;
    fn set_dirty(&mut self, dirty: bool);
    fn is_local(&self) -> bool;
    fn set_local(&mut self, local: bool);
}

/// Display name used for duplicate-by-name matching
pub trait HasName {
    fn name(&self) -> Option<&str>;
    fn set_name(&mut self, name: String);

    /// Case-insensitive name comparison
    fn name_matches(&self, other: &str) -> bool {
        self.name()
            .map(|name| name.to_lowercase() == other.to_lowercase())
            .unwrap_or(false)
    }
}

/// Entities that may belong to a linked notebook
pub trait LinkedNotebookOwned {
    fn linked_notebook_guid(&self) -> Option<&str>;
    fn set_linked_notebook_guid(&mut self, guid: Option<String>);
}

/// Full capability set of a synchronizable entity
pub trait Entity:
    HasGuid + HasUsn + DirtyTrackable + Clone + fmt::Debug + Send + 'static
{
    const KIND: EntityKind;

    fn into_any(self) -> AnyEntity;
    fn from_any(any: AnyEntity) -> EntityResult<Self>;
}

/// Runs an entity's validation and converts failures into an `EntityError`
pub fn ensure_valid<T: Entity + Validator>(entity: &T) -> EntityResult<()> {
    entity.validate().map_err(|reasons| EntityError::Invalid {
        kind: T::KIND,
        reasons,
    })
}

/// Type-erased entity carried by storage messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AnyEntity {
    Tag(Tag),
    SavedSearch(SavedSearch),
    Notebook(Notebook),
    Note(Note),
    Resource(Resource),
    LinkedNotebook(LinkedNotebook),
}

impl AnyEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            AnyEntity::Tag(_) => EntityKind::Tag,
            AnyEntity::SavedSearch(_) => EntityKind::SavedSearch,
            AnyEntity::Notebook(_) => EntityKind::Notebook,
            AnyEntity::Note(_) => EntityKind::Note,
            AnyEntity::Resource(_) => EntityKind::Resource,
            AnyEntity::LinkedNotebook(_) => EntityKind::LinkedNotebook,
        }
    }

    pub fn guid(&self) -> Option<&str> {
        match self {
            AnyEntity::Tag(e) => e.guid(),
            AnyEntity::SavedSearch(e) => e.guid(),
            AnyEntity::Notebook(e) => e.guid(),
            AnyEntity::Note(e) => e.guid(),
            AnyEntity::Resource(e) => e.guid(),
            AnyEntity::LinkedNotebook(e) => e.guid(),
        }
    }

    pub fn local_id(&self) -> LocalId {
        match self {
            AnyEntity::Tag(e) => e.local_id(),
            AnyEntity::SavedSearch(e) => e.local_id(),
            AnyEntity::Notebook(e) => e.local_id(),
            AnyEntity::Note(e) => e.local_id(),
            AnyEntity::Resource(e) => e.local_id(),
            AnyEntity::LinkedNotebook(e) => e.local_id(),
        }
    }

    /// Name of the entity, for kinds that have one
    pub fn name(&self) -> Option<&str> {
        match self {
            AnyEntity::Tag(e) => e.name(),
            AnyEntity::SavedSearch(e) => e.name(),
            AnyEntity::Notebook(e) => e.name(),
            AnyEntity::Note(e) => e.name(),
            AnyEntity::Resource(_) | AnyEntity::LinkedNotebook(_) => None,
        }
    }

    /// Converts into a concrete entity type
    pub fn downcast<T: Entity>(self) -> EntityResult<T> {
        T::from_any(self)
    }
}

macro_rules! impl_entity {
    ($ty:ident, $kind:expr) => {
        impl HasGuid for $ty {
            fn guid(&self) -> Option<&str> {
                self.guid.as_deref()
            }

            fn set_guid(&mut self, guid: Option<String>) {
                self.guid = guid;
            }

            fn local_id(&self) -> LocalId {
                self.local_id
            }

            fn set_local_id(&mut self, local_id: LocalId) {
                self.local_id = local_id;
            }
        }

        impl HasUsn for $ty {
            fn usn(&self) -> Option<Usn> {
                self.usn
            }

            fn set_usn(&mut self, usn: Option<Usn>) {
                self.usn = usn;
            }
        }

        impl DirtyTrackable for $ty {
            fn is_dirty(&self) -> bool {
                self.dirty
            }

            fn set_dirty(&mut self, dirty: bool) {
                self.dirty = dirty;
            }

            fn is_local(&self) -> bool {
                self.local
            }

            fn set_local(&mut self, local: bool) {
                self.local = local;
            }
        }

        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn into_any(self) -> AnyEntity {
                AnyEntity::$ty(self)
            }

            fn from_any(any: AnyEntity) -> EntityResult<Self> {
                match any {
                    AnyEntity::$ty(entity) => Ok(entity),
                    other => Err(EntityError::KindMismatch {
                        expected: $kind,
                        found: other.kind(),
                    }),
                }
            }
        }

        impl From<$ty> for AnyEntity {
            fn from(entity: $ty) -> Self {
                AnyEntity::$ty(entity)
            }
        }
    };
}

impl_entity!(Tag, EntityKind::Tag);
impl_entity!(SavedSearch, EntityKind::SavedSearch);
impl_entity!(Notebook, EntityKind::Notebook);
impl_entity!(Note, EntityKind::Note);
impl_entity!(Resource, EntityKind::Resource);
impl_entity!(LinkedNotebook, EntityKind::LinkedNotebook);

macro_rules! impl_named {
    ($ty:ident, $field:ident) => {
        impl HasName for $ty {
            fn name(&self) -> Option<&str> {
                self.$field.as_deref()
            }

            fn set_name(&mut self, name: String) {
                self.$field = Some(name);
            }
        }
    };
}

impl_named!(Tag, name);
impl_named!(SavedSearch, name);
impl_named!(Notebook, name);
impl_named!(Note, title);

impl LinkedNotebookOwned for Tag {
    fn linked_notebook_guid(&self) -> Option<&str> {
        self.linked_notebook_guid.as_deref()
    }

    fn set_linked_notebook_guid(&mut self, guid: Option<String>) {
        self.linked_notebook_guid = guid;
    }
}

impl LinkedNotebookOwned for Notebook {
    fn linked_notebook_guid(&self) -> Option<&str> {
        self.linked_notebook_guid.as_deref()
    }

    fn set_linked_notebook_guid(&mut self, guid: Option<String>) {
        self.linked_notebook_guid = guid;
    }
}
