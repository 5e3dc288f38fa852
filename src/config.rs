use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::risk_engine::RiskConfig;

/// Top-level settings for the decision core.
///
/// Layered sources, later wins: `config/config.{toml,json}`,
/// `config/local.{toml,json}` (not checked in), then environment overrides
/// like `DECISION__STORE__RECOVERY_TIMEOUT_MS=60000`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the decision log, snapshot store and redb file.
    pub data_dir: PathBuf,
    /// IN_FLIGHT idempotency records older than this are surfaced for
    /// operator reconciliation on startup.
    pub recovery_timeout_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            recovery_timeout_ms: 300_000,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/.decision-core/config", home)).required(false))
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("DECISION").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings
            .risk
            .validate()
            .map_err(ConfigError::Message)?;
        Ok(settings)
    }
}
