//! Configuration layer loading from disk.
//!
//! A layer is one folder contributing a policy document: the builtin
//! assets, a plugin folder, or the user's root folder. Layers are loaded
//! raw and unmerged; folding and validation happen in the assembly
//! pipeline.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::Configuration;
use crate::config::validation::ValidationError;

/// Config file names recognized inside a layer folder, in preference order.
/// The JSON form exists so that explicit `null` tombstones can be expressed.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["hearth.toml", "hearth.json"];

/// Error type for configuration loading and assembly.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("parse error: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Structure(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Load one raw layer from a config file (TOML or JSON by extension).
pub fn load_layer(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(toml::from_str(&content)?)
    }
}

/// Load the layer declared by a folder, trying each recognized file name.
pub fn load_layer_dir(dir: &Path) -> Result<Configuration, ConfigError> {
    for name in CONFIG_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return load_layer(&candidate);
        }
    }
    Err(ConfigError::Structure(format!(
        "no {} or {} found in {}",
        CONFIG_FILE_NAMES[0],
        CONFIG_FILE_NAMES[1],
        dir.display()
    )))
}
