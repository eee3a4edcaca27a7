//! Linked notebook entity
//!
//! A linked notebook is a pointer to a notebook that lives in another
//! account. It carries the routing information needed to reach that
//! account's delta-sync feed.

use crate::types::common::into_validation_result;
use crate::types::{LocalId, Timestamp, Usn, Validator};
use serde::{Deserialize, Serialize};

/// Pointer to a notebook shared from another account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedNotebook {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub usn: Option<Usn>,
    pub share_name: Option<String>,
    pub username: Option<String>,
    pub shard_id: Option<String>,
    pub share_key: Option<String>,
    pub uri: Option<String>,
    pub note_store_url: Option<String>,
    pub web_api_url_prefix: Option<String>,
    pub dirty: bool,
    pub local: bool,
}

impl LinkedNotebook {
    pub fn new(guid: impl Into<String>, usn: Usn) -> Self {
        Self {
            guid: Some(guid.into()),
            usn: Some(usn),
            ..Self::default()
        }
    }

    pub fn with_share(mut self, share_name: impl Into<String>, share_key: impl Into<String>) -> Self {
        self.share_name = Some(share_name.into());
        self.share_key = Some(share_key.into());
        self
    }

    pub fn with_note_store(mut self, shard_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.shard_id = Some(shard_id.into());
        self.note_store_url = Some(url.into());
        self
    }
}

impl Validator for LinkedNotebook {
    /// A linked notebook must be addressable before its content can be synced
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.guid.is_none() {
            errors.push("Linked notebook has no guid".to_string());
        }
        if self.share_key.is_none() {
            errors.push("Linked notebook has no share key".to_string());
        }
        into_validation_result(errors)
    }
}

/// Authentication token for one linked notebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNotebookAuth {
    pub token: String,
    pub expires_at: Timestamp,
}

impl LinkedNotebookAuth {
    pub fn new(token: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Returns true if the token is still valid for at least `min_validity_secs`
    pub fn is_valid_for(&self, now: Timestamp, min_validity_secs: i64) -> bool {
        self.expires_at.as_millis() - now.as_millis() >= min_validity_secs.saturating_mul(1000)
    }
}
