//! Reading and writing `config.toml`

use crate::{Config, ConfigError, ConfigResult, CONFIG_VERSION};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const HEADER: &str = "\
# notesync configuration
#
# Any value can be overridden with NOTESYNC_<SECTION>_<FIELD>,
# e.g. NOTESYNC_SYNC_MAX_SYNC_CHUNK_ENTRIES=100

";

/// Reads the config at `path`, or the defaults when there is no file
///
/// Out-of-range values are logged, not rejected.
pub(crate) fn read(path: &Path) -> ConfigResult<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    if contents.trim().is_empty() {
        return Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "config file is empty"),
        });
    }

    let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    if config.version > CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found: config.version,
            supported: CONFIG_VERSION,
        });
    }

    if let Err(errors) = config.validate() {
        for error in errors {
            log::warn!("{}: {}", path.display(), error);
        }
    }
    Ok(config)
}

/// Writes `config` to a new file at `path`
///
/// The file appears complete or not at all; an existing file is left alone.
pub(crate) fn create(path: &Path, config: &Config) -> ConfigResult<()> {
    let dir = path.parent().ok_or_else(|| ConfigError::PathResolutionError {
        reason: format!("{} has no parent directory", path.display()),
    })?;
    fs::create_dir_all(dir).map_err(|e| ConfigError::DirectoryCreationError {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let body = toml::to_string_pretty(config)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(HEADER.as_bytes())?;
    temp.write_all(body.as_bytes())?;
    temp.flush()?;
    temp.persist_noclobber(path)
        .map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e.error,
        })?;

    log::info!("Wrote config to {}", path.display());
    Ok(())
}
