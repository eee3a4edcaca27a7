//! Resource (note attachment) entity

use crate::types::{LocalId, Usn};
use serde::{Deserialize, Serialize};

/// Binary attachment of a note
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub note_guid: Option<String>,
    pub note_local_id: Option<LocalId>,
    pub mime: Option<String>,
    pub data: Option<Vec<u8>>,
    pub recognition_data: Option<Vec<u8>>,
    pub alternate_data: Option<Vec<u8>>,
    pub dirty: bool,
    pub local: bool,
}

impl Resource {
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: Some(mime.into()),
            ..Self::default()
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>, usn: Usn) -> Self {
        self.guid = Some(guid.into());
        self.usn = Some(usn);
        self
    }

    pub fn with_note(mut self, note_guid: impl Into<String>) -> Self {
        self.note_guid = Some(note_guid.into());
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }
}
