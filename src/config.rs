use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::manager::task_registry::MAX_TASK_ID;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default, alias = "botToken")]
    pub bot_token: Option<String>,
    /// Usernames allowed to use the bot. Empty or `["*"]` allows everyone.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_max_task_id")]
    pub max_task_id: usize,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Longest single message, in characters, including prefix and suffix.
    pub max_message_len: usize,
    pub max_send_retry: usize,
    pub retry_delay_ms: u64,
    pub refresh_interval_ms: u64,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("configs/scripts")
}

fn default_max_task_id() -> usize {
    MAX_TASK_ID
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            max_message_len: 4000,
            max_send_retry: 1000,
            retry_delay_ms: 200,
            refresh_interval_ms: 1000,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bot_token: None,
            users: Vec::new(),
            shell: default_shell(),
            scripts_dir: default_scripts_dir(),
            max_task_id: default_max_task_id(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("shell must not be empty".into()));
        }
        if self.max_task_id == 0 {
            return Err(ConfigError::Invalid("max_task_id must be positive".into()));
        }
        let delivery = &self.delivery;
        if delivery.max_message_len < 32 {
            return Err(ConfigError::Invalid(
                "delivery.max_message_len must be at least 32".into(),
            ));
        }
        if delivery.max_send_retry == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_send_retry must be positive".into(),
            ));
        }
        if delivery.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery.refresh_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Result<&str, ConfigError> {
        self.bot_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("bot_token is required".into()))
    }

    pub fn is_allowed(&self, username: Option<&str>) -> bool {
        if self.users.is_empty() || self.users[0] == "*" {
            return true;
        }
        username.is_some_and(|name| self.users.iter().any(|user| user == name))
    }
}
