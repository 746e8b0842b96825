use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use lode_worker::WorkerConfig;

/// Field name conventionally used for the source blob name.
pub const DEFAULT_BLOB_PATH_FIELD: &str = "azureblobfilepath";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the blobs and the registry.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write records as JSON objects carrying the source blob name.
    pub add_blob_path: bool,
    pub blob_path_field: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            add_blob_path: false,
            blob_path_field: DEFAULT_BLOB_PATH_FIELD.into(),
        }
    }
}

impl OutputConfig {
    /// The decoration field, if decoration is on.
    pub fn blob_path_field(&self) -> Option<&str> {
        self.add_blob_path.then_some(self.blob_path_field.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodeConfig {
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub output: OutputConfig,
}

impl LodeConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut config: LodeConfig = toml::from_str(text).context("invalid configuration")?;
        config.worker.normalize();
        config.worker.validate()?;
        Ok(config)
    }

    /// Load from `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::parse(&text).with_context(|| format!("in {}", path.display()))
            }
            None => Self::parse(""),
        }
    }
}
