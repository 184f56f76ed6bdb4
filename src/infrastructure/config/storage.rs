//! Locating, reading and seeding the configuration file.

use super::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, AppConfig};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while locating or seeding the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No `--config` was given and the platform has no config directory.
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    /// Reading or writing the file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The default configuration could not be rendered.
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Owns the path of the configuration file in use.
#[derive(Debug, Clone)]
pub struct StorageManager {
    config_path: PathBuf,
}

impl StorageManager {
    /// Picks the configuration file: `path_override` when given, else
    /// `config.toml` in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigDirNotFound` if there is no override and
    /// the platform config directory cannot be determined.
    pub fn locate(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path_override {
            return Ok(Self::at(path.to_path_buf()));
        }
        let config_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirNotFound)?;
        Ok(Self::at(config_dir.join(CONFIG_FILE_NAME)))
    }

    /// Uses an explicit configuration file path.
    #[must_use]
    pub const fn at(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Returns the configuration file path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Loads the application configuration.
    ///
    /// A missing file is seeded with defaults; a malformed one is left
    /// untouched and defaults are used. The returned config records the
    /// path it came from.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or seeded.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = if self.config_path.exists() {
            self.read_or_default()?
        } else {
            info!(path = %self.config_path.display(), "Config file not found, creating default");
            let config = AppConfig::default();
            self.write_atomic(&config)?;
            config
        };
        config.config = Some(self.config_path.clone());
        Ok(config)
    }

    fn read_or_default(&self) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => {
                debug!(path = %self.config_path.display(), "Loaded config file");
                Ok(config)
            }
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to parse config file, using defaults"
                );
                Ok(AppConfig::default())
            }
        }
    }

    fn write_atomic(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        let parent = match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.persist(&self.config_path).map_err(|e| e.error)?;
        Ok(())
    }
}
