//! Synchronization configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Six hours, the default minimum remaining validity of a linked notebook token
pub const DEFAULT_AUTH_TOKEN_MIN_VALIDITY_SECS: i64 = 6 * 60 * 60;

/// Remote-to-local synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of entries requested per sync chunk
    pub max_sync_chunk_entries: u32,

    /// Number of linked notebooks fetched per local storage page
    pub linked_notebook_page_size: u32,

    /// Linked notebook tokens expiring sooner than this are refreshed before use
    pub auth_token_min_validity_secs: i64,

    /// Download resources during a full sync instead of only with their notes
    pub full_sync_include_resources: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_sync_chunk_entries: 50,
            linked_notebook_page_size: 50,
            auth_token_min_validity_secs: DEFAULT_AUTH_TOKEN_MIN_VALIDITY_SECS,
            full_sync_include_resources: false,
        }
    }
}

impl ConfigSection for SyncConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let results = vec![
            Validator::in_range(
                self.max_sync_chunk_entries,
                1,
                1000,
                "sync.max_sync_chunk_entries",
            ),
            Validator::in_range(
                self.linked_notebook_page_size,
                1,
                1000,
                "sync.linked_notebook_page_size",
            ),
            Validator::in_range(
                self.auth_token_min_validity_secs,
                0,
                7 * 24 * 60 * 60,
                "sync.auth_token_min_validity_secs",
            ),
        ];

        Validator::collect_errors(results)
    }
}
