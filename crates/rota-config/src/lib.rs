//! rota-config: configuration loading for the rota daemon.
//!
//! JSON5 config at `~/.rota/config.json5`; every field has a sensible
//! default so a missing file is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Scheduler loop and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Evaluation interval in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Bound on shell script execution, in seconds.
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
    /// Task database path. Defaults to `<config dir>/tasks.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Checkpoint directory. Defaults to `<config dir>/checkpoints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
}

fn default_tick_secs() -> u64 {
    15
}

fn default_shell_timeout_secs() -> u64 {
    120
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            shell_timeout_secs: default_shell_timeout_secs(),
            db_path: None,
            checkpoint_dir: None,
        }
    }
}

/// Heartbeat monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Tick interval in seconds.
    #[serde(default = "default_hb_interval_secs")]
    pub interval_secs: u64,
    /// Elapsed-time warning threshold in seconds.
    #[serde(default = "default_hb_warning_secs")]
    pub warning_threshold_secs: u64,
}

fn default_hb_interval_secs() -> u64 {
    30
}

fn default_hb_warning_secs() -> u64 {
    120
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_hb_interval_secs(),
            warning_threshold_secs: default_hb_warning_secs(),
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for task notifications. Log-only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Top-level rota configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotaConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl RotaConfig {
    /// Resolved task database path.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.scheduler.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("tasks.db")),
        }
    }

    /// Resolved checkpoint directory.
    pub fn checkpoint_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.scheduler.checkpoint_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("checkpoints")),
        }
    }
}

/// Resolve the rota config directory (~/.rota/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".rota"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.rota/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<RotaConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<RotaConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(RotaConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: RotaConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RotaConfig::default();
        assert_eq!(config.scheduler.tick_secs, 15);
        assert_eq!(config.scheduler.shell_timeout_secs, 120);
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.heartbeat.warning_threshold_secs, 120);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            scheduler: { tick_secs: 5, db_path: "/var/lib/rota/tasks.db" },
            heartbeat: { warning_threshold_secs: 300 },
            notify: { webhook_url: "https://hooks.example.com/rota" },
        }"#;
        let config: RotaConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.scheduler.tick_secs, 5);
        // Unspecified fields keep their defaults.
        assert_eq!(config.scheduler.shell_timeout_secs, 120);
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.heartbeat.warning_threshold_secs, 300);
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("https://hooks.example.com/rota")
        );
        assert_eq!(
            config.db_path().unwrap(),
            PathBuf::from("/var/lib/rota/tasks.db")
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config_from(Path::new("/nonexistent/rota.json5")).unwrap();
        assert_eq!(config.scheduler.tick_secs, 15);
    }
}
