//! Saved search entity

use crate::types::{LocalId, Usn};
use serde::{Deserialize, Serialize};

/// A stored search query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedSearch {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub name: Option<String>,
    pub query: Option<String>,
    pub dirty: bool,
    pub local: bool,
}

impl SavedSearch {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>, usn: Usn) -> Self {
        self.guid = Some(guid.into());
        self.usn = Some(usn);
        self
    }
}
