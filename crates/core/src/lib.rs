//! Entity model shared by the NoteSync crates

pub mod entity;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use entity::{
    ensure_valid, AnyEntity, DirtyTrackable, Entity, EntityKind, HasGuid, HasName, HasUsn,
    LinkedNotebookOwned,
};
pub use error::{EntityError, EntityResult};
pub use types::{
    LinkedNotebook, LinkedNotebookAuth, LocalId, Note, Notebook, Resource, SavedSearch, SyncChunk,
    SyncChunkFilter, SyncState, Tag, Timestamp, Usn, Validator,
};
