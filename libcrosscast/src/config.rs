//! Configuration management for Crosscast
//!
//! Every section and field has a default, so a partial `config.toml` (or none
//! at all, via [`Config::default`]) yields a usable configuration. Platform
//! API bases are configurable so the engine can be pointed at staging or
//! fixture servers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub instagram: InstagramConfig,
    pub facebook: FacebookConfig,
    pub youtube: YouTubeConfig,
    pub tiktok: TikTokConfig,
    pub scheduling: SchedulingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosscast/crosscast.db".to_string(),
        }
    }
}

/// Outbound HTTP admission and retry settings, shared by every platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum simultaneous in-flight calls
    pub max_concurrent: usize,
    /// Minimum spacing between call starts, in milliseconds (0 disables)
    pub min_spacing_ms: u64,
    /// Per-call timeout, in seconds
    pub timeout_secs: u64,
    /// Timeout for media downloads and uploads, in seconds
    pub media_timeout_secs: u64,
    /// Retries after the first attempt for network errors and 5xx
    pub max_retries: usize,
    /// First backoff delay, in milliseconds
    pub retry_min_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_spacing_ms: 100,
            timeout_secs: 30,
            media_timeout_secs: 600,
            max_retries: 3,
            retry_min_delay_ms: 500,
            user_agent: concat!("crosscast/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.retry_min_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstagramConfig {
    pub api_base: String,
    pub api_version: String,
    /// Seconds between Reel container status checks
    pub container_poll_interval_secs: u64,
    pub container_poll_attempts: u32,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.instagram.com".to_string(),
            api_version: "v21.0".to_string(),
            container_poll_interval_secs: 5,
            container_poll_attempts: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacebookConfig {
    pub api_base: String,
    pub api_version: String,
    pub app_id: String,
    pub app_secret: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// YouTube category id for uploads ("22" is People & Blogs)
    pub category_id: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            category_id: "22".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TikTokConfig {
    pub api_base: String,
    pub client_key: String,
    pub client_secret: String,
    /// Milliseconds between publish status checks
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    /// Wall-clock bound on status polling, in seconds
    pub poll_timeout_secs: u64,
    /// Hard ceiling on the source video size, in bytes
    pub max_video_bytes: u64,
    /// Accept plain HTTP and local video hosts (fixtures and staging only)
    pub allow_local_media: bool,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            api_base: "https://open.tiktokapis.com".to_string(),
            client_key: String::new(),
            client_secret: String::new(),
            poll_interval_ms: 10_000,
            max_poll_attempts: 30,
            poll_timeout_secs: 300,
            max_video_bytes: 4 * 1024 * 1024 * 1024,
            allow_local_media: false,
        }
    }
}

impl TikTokConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Seconds between reconciler passes in daemon mode
    pub poll_interval: u64,
    /// Failed cycles before a post becomes terminally failed
    pub max_retries: u32,
    /// Seconds a failed post is pushed back before its next attempt
    pub retry_delay: u64,
    /// Shared secret required by external reconciler triggers
    pub trigger_secret: Option<String>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            max_retries: 3,
            retry_delay: 300,
            trigger_secret: None,
        }
    }
}

impl SchedulingConfig {
    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retry_delay).unwrap_or(i64::MAX / 1000))
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets may come from the environment instead of the file
    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("CROSSCAST_TRIGGER_SECRET") {
            if !secret.is_empty() {
                self.scheduling.trigger_secret = Some(secret);
            }
        }
        if let Ok(path) = std::env::var("CROSSCAST_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}
