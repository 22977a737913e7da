use std::path::Path;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use kvclient::DbConfig;
use kvclient::api::{IsolationLevel, UserPriority};
use serde::Deserialize;

use crate::errors::Result;

const PREFIX: &str = "SPINE";
const SEPARATOR: &str = "__";

/// Configuration for executing statements. Values from the config file can
/// be overridden with environment variables prefixed with `SPINE__`, e.g.
/// `SPINE__KV__MAX_TXN_RETRIES=3`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Max number of times a statement in an implicit transaction is
    /// transparently retried after a retryable error.
    pub max_auto_retries: usize,
    pub default_priority: UserPriority,
    pub default_isolation: IsolationLevel,
    pub kv: DbConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            max_auto_retries: 10,
            default_priority: UserPriority::Normal,
            default_isolation: IsolationLevel::Serializable,
            kv: DbConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Load the config from an optional TOML file layered under the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::base(path).build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn base(path: Option<&Path>) -> ConfigBuilder<DefaultState> {
        let env_config = Environment::with_prefix(PREFIX)
            .separator(SEPARATOR)
            .ignore_empty(true)
            .keep_prefix(false);

        let mut config_builder = Config::builder();
        if let Some(path) = path {
            let file = File::from(path).format(FileFormat::Toml).required(true);
            config_builder = config_builder.add_source(file);
        }

        config_builder.add_source(env_config)
    }
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub application_name: String,
    pub default_txn_priority: UserPriority,
    pub default_txn_isolation: IsolationLevel,
    pub default_txn_read_only: bool,
}

impl Default for SessionData {
    fn default() -> Self {
        SessionData {
            application_name: "$ internal".to_string(),
            default_txn_priority: UserPriority::Normal,
            default_txn_isolation: IsolationLevel::Serializable,
            default_txn_read_only: false,
        }
    }
}

impl SessionData {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        SessionData {
            default_txn_priority: config.default_priority,
            default_txn_isolation: config.default_isolation,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let conf = ExecutorConfig::default();
        assert_eq!(10, conf.max_auto_retries);
        assert_eq!(5, conf.kv.max_txn_retries);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
max_auto_retries = 2
default_priority = "high"

[kv]
max_txn_retries = 7
default_isolation = "snapshot"
"#
        )
        .unwrap();

        let conf = ExecutorConfig::load(Some(file.path())).unwrap();
        assert_eq!(2, conf.max_auto_retries);
        assert_eq!(UserPriority::High, conf.default_priority);
        assert_eq!(IsolationLevel::Serializable, conf.default_isolation);
        assert_eq!(7, conf.kv.max_txn_retries);
        assert_eq!(IsolationLevel::Snapshot, conf.kv.default_isolation);

        let session = SessionData::from_config(&conf);
        assert_eq!(UserPriority::High, session.default_txn_priority);
    }

    #[test]
    fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        ExecutorConfig::load(Some(&path)).unwrap_err();
    }
}
