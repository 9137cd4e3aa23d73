use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// hourly | daily | never
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "wallet-ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// Remote account/transaction backend
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Retry and timeout policy shared by the transfer and adjustment engines
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Optimistic read-modify-write attempts per balance mutation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Attempts for refunding a sender after a failed credit
    #[serde(default = "default_compensation_attempts")]
    pub compensation_attempts: u32,
    /// Bound on every single store call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Transfer journal file; in-memory only when unset
    #[serde(default)]
    pub journal_path: Option<String>,
    /// How long settled transfers stay in the journal
    #[serde(default = "default_journal_retention_secs")]
    pub journal_retention_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    5
}

fn default_backoff_max_ms() -> u64 {
    200
}

fn default_compensation_attempts() -> u32 {
    20
}

fn default_call_timeout_ms() -> u64 {
    3000
}

fn default_journal_retention_secs() -> u64 {
    24 * 60 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            compensation_attempts: default_compensation_attempts(),
            call_timeout_ms: default_call_timeout_ms(),
            journal_path: None,
            journal_retention_secs: default_journal_retention_secs(),
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn journal_retention(&self) -> Duration {
        Duration::from_secs(self.journal_retention_secs)
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.compensation_attempts, 20);
        assert_eq!(config.call_timeout(), Duration::from_secs(3));
        assert_eq!(config.journal_path, None);
        assert_eq!(config.journal_retention(), Duration::from_secs(86400));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "store:\n  base_url: \"https://wallet.example.com/api\"\nengine:\n  max_attempts: 8\n"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.base_url, "https://wallet.example.com/api");
        assert_eq!(config.store.call_timeout_ms, 3000);
        assert_eq!(config.engine.max_attempts, 8);
        assert_eq!(config.engine.backoff_max_ms, 200);
        assert_eq!(config.log.rotation, "daily");
        assert_eq!(config.engine.journal_retention_secs, 86400);
    }

    #[test]
    fn test_shipped_configs_persist_the_journal() {
        for env in ["dev", "prod"] {
            let config = AppConfig::from_file(format!(
                "{}/config/{}.yaml",
                env!("CARGO_MANIFEST_DIR"),
                env
            ))
            .unwrap();
            assert!(config.engine.journal_path.is_some(), "{}", env);
        }
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = AppConfig::from_file("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
