//! Startup configuration, loaded once before the game is constructed.

use log::warn;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("grid dimensions must be positive, got {0}x{1}")]
    InvalidGrid(i32, i32),
}

/// Immutable server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_clients: usize,
    pub grid_width: i32,
    pub grid_height: i32,
    pub display_width: u32,
    pub display_height: u32,
    pub banner_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_clients: 60,
            grid_width: 100,
            grid_height: 100,
            display_width: 1000,
            display_height: 1000,
            banner_height: 100,
        }
    }
}

/// Raw file contents; every key is optional and unknown keys are
/// collected so they can be warned about instead of rejected.
#[derive(Debug, Deserialize)]
struct FileConfig {
    max_clients: Option<usize>,
    grid_width: Option<i32>,
    grid_height: Option<i32>,
    display_width: Option<u32>,
    display_height: Option<u32>,
    banner_height: Option<u32>,
    #[serde(flatten)]
    unknown: toml::Table,
}

impl Config {
    /// Loads the configuration from a TOML file. A missing file is not an
    /// error: the compiled-in defaults are used. Unknown keys produce a
    /// warning only.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "configuration file {} does not exist, proceeding with defaults",
                path.display()
            );
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        for key in file.unknown.keys() {
            warn!("unknown parameter in configuration file: {}", key);
        }

        let defaults = Config::default();
        let conf = Config {
            max_clients: file.max_clients.unwrap_or(defaults.max_clients),
            grid_width: file.grid_width.unwrap_or(defaults.grid_width),
            grid_height: file.grid_height.unwrap_or(defaults.grid_height),
            display_width: file.display_width.unwrap_or(defaults.display_width),
            display_height: file.display_height.unwrap_or(defaults.display_height),
            banner_height: file.banner_height.unwrap_or(defaults.banner_height),
        };

        if conf.grid_width <= 0 || conf.grid_height <= 0 {
            return Err(ConfigError::InvalidGrid(conf.grid_width, conf.grid_height));
        }

        Ok(conf)
    }
}
