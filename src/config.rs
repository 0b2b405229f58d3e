//! Command-line configuration
//!
//! Resolves where the validation cache lives and whether it is used at all.

use std::path::PathBuf;

use crate::cache::ValidationCache;

/// Application name used for the config directory
pub const APP_DIR_NAME: &str = "bloompack";
/// File name of the verdict cache database
pub const CACHE_FILE_NAME: &str = "checked_files.db";

/// Settings shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Explicit cache database path (otherwise the per-user default)
    pub cache_path: Option<PathBuf>,

    /// Skip the cache entirely and always scan
    pub no_cache: bool,
}

impl AppConfig {
    /// Default cache database location, `<config dir>/bloompack/checked_files.db`
    pub fn default_cache_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR_NAME).join(CACHE_FILE_NAME))
    }

    /// Cache path to use, `None` when caching is disabled
    pub fn resolved_cache_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        if self.no_cache {
            return Ok(None);
        }
        match &self.cache_path {
            Some(path) => Ok(Some(path.clone())),
            None => Self::default_cache_path().map(Some),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.no_cache && self.cache_path.is_some() {
            return Err(ConfigError::ConflictingCacheOptions);
        }
        if let Some(path) = &self.cache_path {
            if path.is_dir() {
                return Err(ConfigError::CachePathIsDirectory(path.clone()));
            }
        }
        Ok(())
    }

    /// Open the configured cache.
    ///
    /// The cache is advisory: if it cannot be opened the caller gets `None`
    /// and validation simply scans every time.
    pub fn open_cache(&self) -> Option<ValidationCache> {
        let path = match self.resolved_cache_path() {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Validation cache disabled: {}", e);
                return None;
            }
        };

        match ValidationCache::open(&path) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Validation cache disabled ({}): {}", path.display(), e);
                None
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("--cache and --no-cache cannot be used together")]
    ConflictingCacheOptions,

    #[error("Cache path is a directory: {0}")]
    CachePathIsDirectory(PathBuf),
}
