// src/config.rs

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_THREADS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Engine settings, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count used when a task does not ask for one.
    pub threads: usize,
    /// Where new downloads go when no path is given.
    pub download_dir: PathBuf,
    pub connect_timeout_secs: u64,
    /// Longest wait for a single body read before the chunk is given up.
    pub read_timeout_secs: u64,
    pub sample_interval_ms: u64,
    /// Explicit proxy URL. When unset the system proxy settings apply.
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            download_dir: default_download_dir(),
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
            sample_interval_ms: 1000,
            proxy: None,
            user_agent: concat!("rangedl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    /// Worker count for a task that requested `requested` workers.
    pub fn effective_threads(&self, requested: usize) -> usize {
        if requested > 0 {
            requested
        } else {
            self.threads.max(1)
        }
    }

    /// Loads the config at `path`, writing the defaults there if it is missing.
    ///
    /// A file that cannot be parsed is left untouched and the defaults are used.
    pub async fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path).await?;
                info!(path = %path.display(), "wrote default config");
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// `<config dir>/rangedl/config.json`, falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rangedl")
        .join("config.json")
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_config_is_initialised() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = EngineConfig::load_or_init(&path).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "threads": 8, "proxy": "http://127.0.0.1:3128" }"#)
            .await
            .unwrap();

        let config = EngineConfig::load_or_init(&path).await.unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn broken_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "threads = 8").await.unwrap();

        let config = EngineConfig::load_or_init(&path).await.unwrap();
        assert_eq!(config.threads, DEFAULT_THREADS);
    }

    #[test]
    fn requested_threads_win() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_threads(0), DEFAULT_THREADS);
        assert_eq!(config.effective_threads(12), 12);
    }
}
