//! Configuration loader and validator for the liked-videos publisher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::worker::WorkerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub tiktok: TikTok,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_secs: u64,
    /// Pause before publishing each new video.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    /// Total tries for recording a published id before giving up.
    #[serde(default = "default_cache_write_attempts")]
    pub cache_write_attempts: usize,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Destination chat or channel id.
    pub chat_id: i64,
}

/// TikTok account whose liked videos are forwarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TikTok {
    pub sec_uid: String,
    pub session_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_item_delay_ms() -> u64 {
    5_000
}

fn default_cache_write_attempts() -> usize {
    3
}

fn default_page_size() -> u32 {
    30
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` if set, otherwise `publisher.db` inside the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}/publisher.db", self.app.resolved_data_dir())
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            chat_id: self.telegram.chat_id,
            poll_interval: Duration::from_secs(self.app.poll_interval_secs),
            item_delay: Duration::from_millis(self.app.item_delay_ms),
            cache_write_attempts: self.app.cache_write_attempts,
            ..WorkerSettings::default()
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.cache_write_attempts == 0 {
        return Err(ConfigError::Invalid("app.cache_write_attempts must be >= 1"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.chat_id == 0 {
        return Err(ConfigError::Invalid("telegram.chat_id must be set"));
    }

    if cfg.tiktok.sec_uid.trim().is_empty() {
        return Err(ConfigError::Invalid("tiktok.sec_uid must be non-empty"));
    }
    if cfg.tiktok.session_id.trim().is_empty() {
        return Err(ConfigError::Invalid("tiktok.session_id must be non-empty"));
    }
    if !(1..=100).contains(&cfg.tiktok.page_size) {
        return Err(ConfigError::Invalid("tiktok.page_size must be within 1..=100"));
    }
    if let Some(base) = &cfg.tiktok.base_url {
        if reqwest::Url::parse(base).is_err() {
            return Err(ConfigError::Invalid("tiktok.base_url must be an absolute URL"));
        }
    }

    Ok(())
}

/// Returns the example YAML shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 60
  item_delay_ms: 5000
  cache_write_attempts: 3

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  chat_id: -1001234567890

tiktok:
  sec_uid: "YOUR_TIKTOK_SEC_UID"
  session_id: "YOUR_TIKTOK_SESSIONID_COOKIE"
"#
}
