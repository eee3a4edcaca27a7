//! Locating, creating and loading the config file

use crate::{file, Config, ConfigError, ConfigResult, LogLevel};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// Entry point for the `notesync` config file
///
/// The file lives in the platform config directory unless a directory is
/// given explicitly:
/// - Linux: `~/.config/notesync/`
/// - macOS: `~/Library/Application Support/notesync/`
/// - Windows: `%APPDATA%\notesync\`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Uses the platform config directory
    pub fn new() -> ConfigResult<Self> {
        let dirs = ProjectDirs::from("", "", "notesync").ok_or_else(|| {
            ConfigError::PathResolutionError {
                reason: "Could not determine user config directory".to_string(),
            }
        })?;
        Ok(Self::with_directory(dirs.config_dir()))
    }

    /// Uses `config.toml` inside `config_dir`
    pub fn with_directory(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_dir.as_ref().join(CONFIG_FILE),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Writes a default config file unless one exists
    ///
    /// Returns true if a file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path.exists() {
            log::info!("Config file already exists at {}", self.config_path.display());
            return Ok(false);
        }

        file::create(&self.config_path, &Config::default())?;
        Ok(true)
    }

    /// Loads the config file and applies `NOTESYNC_<SECTION>_<FIELD>` overrides
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = file::read(&self.config_path)?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        if let Err(errors) = config.validate() {
            log::warn!("Config is out of range after env overrides: {:?}", errors);
        }
        Ok(config)
    }
}

/// Applies overrides read through `lookup`; unparseable values are skipped
fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("NOTESYNC_APP_LOG_LEVEL") {
        match level.parse::<LogLevel>() {
            Ok(level) => config.app.log_level = level,
            Err(e) => log::warn!("Ignoring log level override: {}", e),
        }
    }

    if let Some(dir) = lookup("NOTESYNC_APP_DATA_DIR") {
        config.app.data_dir = PathBuf::from(dir);
    }

    if let Some(v) = parsed(&lookup, "NOTESYNC_SYNC_MAX_SYNC_CHUNK_ENTRIES") {
        config.sync.max_sync_chunk_entries = v;
    }
    if let Some(v) = parsed(&lookup, "NOTESYNC_SYNC_LINKED_NOTEBOOK_PAGE_SIZE") {
        config.sync.linked_notebook_page_size = v;
    }
    if let Some(v) = parsed(&lookup, "NOTESYNC_SYNC_AUTH_TOKEN_MIN_VALIDITY_SECS") {
        config.sync.auth_token_min_validity_secs = v;
    }
    if let Some(v) = parsed(&lookup, "NOTESYNC_SYNC_FULL_SYNC_INCLUDE_RESOURCES") {
        config.sync.full_sync_include_resources = v;
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}
