//! Engine configuration, persisted as JSON under the user config directory.

use std::time::Duration;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::currency::CurrencyCode;

const CONFIG_DIR: &str = "report_core";
const CONFIG_FILE: &str = "config.json";
const TMP_SUFFIX: &str = "tmp";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid json: {0}")]
    Serde(String),
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err.to_string())
    }
}

/// Tunables for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub reporting_currency: String,
    pub worker_threads: usize,
    pub default_cache_ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_deadline_secs: Option<u64>,
    /// Nothing predates the platform itself; used as the default
    /// earliest-start bound when options carry none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_launch: Option<DateTime<Utc>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reporting_currency: "USD".into(),
            worker_threads: 8,
            default_cache_ttl_secs: 3600,
            query_deadline_secs: Some(30),
            platform_launch: None,
        }
    }
}

impl EngineConfig {
    pub fn reporting_currency(&self) -> CurrencyCode {
        CurrencyCode::new(&self.reporting_currency)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.default_cache_ttl_secs)
    }

    pub fn query_deadline(&self) -> Option<Duration> {
        self.query_deadline_secs.map(Duration::from_secs)
    }
}

pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::with_base(base))
    }

    /// Anchors the config file under an explicit base directory.
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            path: base.join(CONFIG_DIR).join(CONFIG_FILE),
        }
    }

    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(EngineConfig::default())
        }
    }

    pub fn save(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        let tmp = tmp_path(&self.path);
        write_atomic(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.reporting_currency(), CurrencyCode::new("USD"));
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.query_deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.platform_launch, None);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_base(dir.path().to_path_buf());
        let config = manager.load().expect("defaults");
        assert_eq!(config.worker_threads, 8);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_base(dir.path().to_path_buf());
        let config = EngineConfig {
            reporting_currency: "eur".into(),
            worker_threads: 2,
            default_cache_ttl_secs: 60,
            query_deadline_secs: None,
            platform_launch: None,
        };
        manager.save(&config).expect("save");

        let loaded = manager.load().expect("load");
        assert_eq!(loaded.reporting_currency(), CurrencyCode::new("EUR"));
        assert_eq!(loaded.worker_threads, 2);
        assert_eq!(loaded.query_deadline(), None);
    }

    #[test]
    fn save_leaves_no_scratch_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = ConfigManager::with_base(dir.path().to_path_buf());
        manager.save(&EngineConfig::default()).expect("save");

        let parent = manager.path().parent().expect("config dir");
        let leftovers: Vec<_> = fs::read_dir(parent)
            .expect("read config dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext == TMP_SUFFIX)
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty());
    }
}
