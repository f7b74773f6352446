//! Configuration file support for o2locktop.
//!
//! Defaults are read from `~/.config/o2locktop/config.toml` (XDG standard),
//! or from the file given with `--config`. Command-line flags always win.
//!
//! # Example configuration
//!
//! ```toml
//! interval = 3
//! lines = 40
//! capacity = 1000
//! unit = "us"
//! ssh_user = "root"
//! fetch_timeout = 5
//! ```

use std::io;
use std::path::{Path, PathBuf};

use o2lock_core::TimeUnit;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Defaults loaded from the configuration file.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Seconds between two reports
    pub interval: Option<u64>,

    /// Rows shown per report
    pub lines: Option<usize>,

    /// Clusters kept by the ranking each cycle
    pub capacity: Option<usize>,

    /// Unit of rendered times
    pub unit: Option<TimeUnit>,

    /// Remote user for ssh transports
    pub ssh_user: Option<String>,

    /// Seconds before a remote command is killed
    pub fetch_timeout: Option<u64>,
}

impl FileConfig {
    /// Load `explicit`, which must exist, or the default file if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        Self::read(&path)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Path of the default configuration file.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = directories::BaseDirs::new().ok_or(ConfigError::NoHome)?;
    Ok(base_dirs.config_dir().join("o2locktop").join("config.toml"))
}
