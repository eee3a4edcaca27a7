//! NoteSync Configuration System
//!
//! Each section of `config.toml` is a type implementing `ConfigSection`.
//! Out-of-range values are reported as warnings on load, and
//! `NOTESYNC_<SECTION>_<FIELD>` environment variables override the file.
//!
//! # Example
//!
//! ```rust,no_run
//! use notesync_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to locate config directory");
//! let config = manager.load_with_env_overrides().unwrap_or_else(|e| {
//!     eprintln!("Config error: {}, using defaults", e);
//!     Config::default()
//! });
//!
//! println!("Chunk size: {}", config.sync.max_sync_chunk_entries);
//! ```

mod error;
mod file;
mod manager;
mod validation;

// Config sections
pub mod app_config;
mod sync_config;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::ConfigManager;
pub use validation::{ConfigSection, Validator};

// Re-export config sections
pub use app_config::{AppConfig, LogLevel};
pub use sync_config::{SyncConfig, DEFAULT_AUTH_TOKEN_MIN_VALIDITY_SECS};

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Application-level settings
    pub app: AppConfig,

    /// Synchronization settings
    pub sync: SyncConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.app.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.sync.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}
