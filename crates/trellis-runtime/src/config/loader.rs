//! Configuration file loader.
//!
//! Merges, in increasing precedence: defaults, the first `trellis.yaml`
//! found on the search paths, and `TRELLIS_*` environment variables.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use tracing::{debug, info};

use super::error::ConfigResult;
use super::schema::TrellisConfig;
use super::validation::validate_config;

/// Default config file name.
const CONFIG_FILE: &str = "trellis.yaml";

/// Configuration loader with file search paths.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader with no search paths.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Adds a search path.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.add_search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads configuration from the first file found, or defaults.
    pub fn load(&self) -> ConfigResult<TrellisConfig> {
        let mut figment = Figment::from(Serialized::defaults(TrellisConfig::default()));

        if let Some(path) = self.find_config_file() {
            info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Yaml::file(path));
        } else {
            debug!("No configuration file found, using defaults");
        }

        let config: TrellisConfig = figment
            .merge(Env::prefixed("TRELLIS_").split("__"))
            .extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<TrellisConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(super::error::ConfigError::FileNotFound(path.to_path_buf()));
        }

        let config: TrellisConfig = Figment::from(Serialized::defaults(TrellisConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TRELLIS_").split("__"))
            .extract()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir()
    }
}
