use std::fs;
use std::path::{Path, PathBuf};

use rangeopt::optimizer::OptimizerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read optimizer config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse optimizer config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid optimizer config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Loads the optimizer config from `explicit`, else from the per-user
/// config file when it exists, else the defaults.
pub fn load(explicit: Option<&Path>) -> Result<(OptimizerConfig, Option<PathBuf>), ConfigError> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    let Some(path) = path else {
        return Ok((OptimizerConfig::default(), None));
    };
    let config = read_file(&path)?;
    Ok((config, Some(path)))
}

fn read_file(path: &Path) -> Result<OptimizerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: OptimizerConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate().map_err(|err| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    Ok(config)
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("rangeopt").join("optimizer.toml"))
}
