//! Configuration loading
//!
//! Resolution order: explicit `--config` file, then
//! `<config dir>/megapull/config.json` when present, then built-in defaults.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::types::AgentConfig;

/// Config file name inside the application config directory
const CONFIG_FILE: &str = "config.json";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Application config directory (`~/.config/megapull` on Linux)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("megapull"))
}

/// Default config file location
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Load configuration.
///
/// An explicitly requested file must exist and parse. The implicit default
/// location is only read if it exists.
pub fn load_config(explicit: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    match config_file() {
        Some(path) if path.is_file() => read_config(&path),
        _ => {
            debug!("[config] No config file found, using defaults");
            Ok(AgentConfig::default())
        }
    }
}

fn read_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!("[config] Loaded {}", path.display());
    Ok(config)
}
