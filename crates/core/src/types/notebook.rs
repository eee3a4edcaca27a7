//! Notebook entity

use crate::types::{LocalId, Timestamp, Usn};
use serde::{Deserialize, Serialize};

/// A container of notes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notebook {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub name: Option<String>,
    pub stack: Option<String>,
    pub default_notebook: bool,
    pub linked_notebook_guid: Option<String>,
    pub created: Option<Timestamp>,
    pub updated: Option<Timestamp>,
    pub dirty: bool,
    pub local: bool,
}

impl Notebook {
    /// Creates a new local notebook
    pub fn new(name: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            name: Some(name.into()),
            created: Some(now),
            updated: Some(now),
            ..Self::default()
        }
    }

    /// Sets the server identity
    pub fn with_guid(mut self, guid: impl Into<String>, usn: Usn) -> Self {
        self.guid = Some(guid.into());
        self.usn = Some(usn);
        self
    }

    /// Returns true if the notebook belongs to another account
    pub fn is_linked(&self) -> bool {
        self.linked_notebook_guid.is_some()
    }
}
