use std::fs;
use std::path::{Path, PathBuf};

use arbor::storage::btree::{BulkOptions, TreeOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings read from a TOML file; flags override them.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(default)]
    pub tree: TreeOptions,
    #[serde(default)]
    pub bulk: BulkOptions,
}

impl CliConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => read_file(path),
            None => Ok(Self::default()),
        }
    }
}

fn read_file(path: &Path) -> Result<CliConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
