use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::delivery::ReconcilerConfig;

const CONFIG_ENV: &str = "CHATSEND_CONFIG";
const TOKEN_ENV: &str = "CHATSEND_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub app_id: String,
    pub token: String,
    pub post_timeout_secs: Option<u64>,
    pub upload_timeout_secs: Option<u64>,
    pub scan_interval_secs: u64,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://api.qiscus.com".to_string(),
            app_id: String::new(),
            token: String::new(),
            post_timeout_secs: Some(30),
            upload_timeout_secs: Some(300),
            scan_interval_secs: 30,
            event_buffer: 100,
        }
    }
}

impl Settings {
    /// Load settings from `path`, `$CHATSEND_CONFIG`, or the default config
    /// file, in that order. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => PathBuf::from(path),
                None => default_config_path()?,
            },
        };

        let mut settings = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let settings: Settings =
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            info!("Loaded settings from {}", path.display());
            settings
        } else {
            info!("No config at {}, using defaults", path.display());
            Settings::default()
        };

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            settings.token = token;
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        serde_json::to_writer_pretty(file, self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            post_timeout: self.post_timeout_secs.map(Duration::from_secs),
            upload_timeout: self.upload_timeout_secs.map(Duration::from_secs),
        }
    }
}

pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("chatsend"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_dir()?.join("config.json"))
}

/// Default location of the JSON message store.
pub fn default_store_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("chatsend").join("messages.json"))
}
