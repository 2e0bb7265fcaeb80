use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Separator between nested keys in environment variable names
pub const ENV_NESTING_SEPARATOR: &str = "__";

/// Builder merging configuration sources, later sources winning
#[derive(Debug, Default)]
pub struct ConfigLoader {
    figment: Figment,
    missing_files: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a YAML file. A missing file is reported by [`ConfigLoader::extract`]
    pub fn with_yaml_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.is_file() {
            debug!("Loading configuration file {}", path.display());
            self.figment = self.figment.merge(Yaml::file(path));
        } else {
            self.missing_files.push(path.to_path_buf());
        }
        self
    }

    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.figment = self.figment.merge(Yaml::string(yaml));
        self
    }

    /// Merge environment variables starting with `prefix`
    pub fn with_env(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(prefix).split(ENV_NESTING_SEPARATOR));
        self
    }

    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(path) = self.missing_files.first() {
            return Err(ConfigError::SourceNotFound(path.display().to_string()));
        }
        Ok(self.figment.extract()?)
    }
}

/// Parse a standalone YAML value, e.g. a fragment passed on a command line
pub fn parse_yaml<T: DeserializeOwned>(yaml: &str) -> Result<T> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
}
