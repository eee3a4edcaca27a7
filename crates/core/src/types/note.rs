//! Note entity

use crate::types::{LocalId, Resource, Timestamp, Usn};
use serde::{Deserialize, Serialize};

/// A note with its attached resources
///
/// Notes delivered inside sync chunks carry metadata only; `content` and the
/// resource bodies arrive through a full-note fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Note {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub notebook_guid: Option<String>,
    pub notebook_local_id: Option<LocalId>,
    pub tag_guids: Vec<String>,
    pub tag_local_ids: Vec<LocalId>,
    pub resources: Vec<Resource>,
    pub created: Option<Timestamp>,
    pub updated: Option<Timestamp>,
    pub active: bool,
    pub dirty: bool,
    pub local: bool,
}

impl Note {
    /// Creates a new local note in the given notebook
    pub fn new(title: impl Into<String>, notebook_guid: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            title: Some(title.into()),
            notebook_guid: Some(notebook_guid.into()),
            created: Some(now),
            updated: Some(now),
            active: true,
            ..Self::default()
        }
    }

    /// Sets the server identity
    pub fn with_guid(mut self, guid: impl Into<String>, usn: Usn) -> Self {
        self.guid = Some(guid.into());
        self.usn = Some(usn);
        self
    }

    /// Sets the note body
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Finds an attached resource by guid
    pub fn resource(&self, guid: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.guid.as_deref() == Some(guid))
    }

    /// Replaces the attached resource with the same guid, or attaches it
    pub fn replace_resource(&mut self, resource: Resource) {
        let existing = self
            .resources
            .iter_mut()
            .find(|r| r.guid.is_some() && r.guid == resource.guid);

        match existing {
            Some(slot) => *slot = resource,
            None => self.resources.push(resource),
        }
    }
}
