//! Entity model for NoteSync
//!
//! This module contains all synchronizable entities organized by type:
//! - `tag`, `saved_search`, `notebook`: container entities
//! - `note`, `resource`: content entities
//! - `linked_notebook`: pointers into other accounts
//! - `sync`: delta-sync protocol value objects
//! - `common`: identifiers, timestamps and validation

mod common;
mod linked_notebook;
mod note;
mod notebook;
mod resource;
mod saved_search;
mod sync;
mod tag;

pub use common::{LocalId, Timestamp, Usn, Validator};
pub use linked_notebook::{LinkedNotebook, LinkedNotebookAuth};
pub use note::Note;
pub use notebook::Notebook;
pub use resource::Resource;
pub use saved_search::SavedSearch;
pub use sync::{SyncChunk, SyncChunkFilter, SyncState};
pub use tag::Tag;
