//! Tag entity

use crate::types::common::into_validation_result;
use crate::types::{LocalId, Usn, Validator};
use serde::{Deserialize, Serialize};

/// A label attached to notes; tags form a hierarchy through `parent_guid`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub name: Option<String>,
    pub parent_guid: Option<String>,
    pub parent_local_id: Option<LocalId>,
    pub linked_notebook_guid: Option<String>,
    pub dirty: bool,
    pub local: bool,
}

impl Tag {
    /// Creates a new local tag
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the server identity
    pub fn with_guid(mut self, guid: impl Into<String>, usn: Usn) -> Self {
        self.guid = Some(guid.into());
        self.usn = Some(usn);
        self
    }

    /// Sets the parent tag guid
    pub fn with_parent(mut self, parent_guid: impl Into<String>) -> Self {
        self.parent_guid = Some(parent_guid.into());
        self
    }
}

impl Validator for Tag {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self.name.as_deref() {
            None => errors.push("Tag has no name".to_string()),
            Some(name) if name.trim().is_empty() => {
                errors.push("Tag name cannot be empty".to_string())
            }
            _ => {}
        }
        if self.parent_guid.is_some() && self.parent_guid == self.guid {
            errors.push("Tag cannot be its own parent".to_string());
        }
        into_validation_result(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tag_is_unsynced() {
        let tag = Tag::new("Work");
        assert!(tag.guid.is_none());
        assert!(tag.usn.is_none());
        assert!(!tag.dirty);
    }

    #[test]
    fn test_tag_validation() {
        assert!(Tag::new("Work").is_valid());
        assert!(!Tag::new("  ").is_valid());
        assert!(!Tag::default().is_valid());

        let looped = Tag::new("x").with_guid("g", 1).with_parent("g");
        assert!(!looped.is_valid());
    }
}
