use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::link::countdown::{DEFAULT_LIFETIME_SECS, DEFAULT_THRESHOLD_SECS};
use crate::link::poller::MIN_POLL_INTERVAL;
use crate::link::{LinkSettings, PollConfig};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dashboard base URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// How long a linking code is shown before it expires
    #[serde(default = "default_lifetime")]
    pub qr_lifetime_secs: u32,

    /// Remaining seconds at which the countdown turns to the warning colour
    #[serde(default = "default_threshold")]
    pub expiring_threshold_secs: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up polling after this many failed requests in a row (unset = never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_poll_failures: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Theme name (default, data-able, teal-minimalist, dark-enterprise)
    #[serde(default = "default_theme")]
    pub theme: String,

    /// Optional accent override as #RRGGBB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent: Option<String>,

    /// Prefill for the device name prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device_name: Option<String>,

    /// Desktop notification when a device links
    #[serde(default)]
    pub notifications: bool,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_lifetime() -> u32 {
    DEFAULT_LIFETIME_SECS
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD_SECS
}

fn default_poll_interval() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_theme() -> String {
    "default".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            qr_lifetime_secs: default_lifetime(),
            expiring_threshold_secs: default_threshold(),
            poll_interval_ms: default_poll_interval(),
            max_poll_failures: None,
            request_timeout_secs: default_request_timeout(),
            theme: default_theme(),
            accent: None,
            last_device_name: None,
            notifications: false,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("qrlink");

        if let Err(e) = std::fs::create_dir_all(&config_dir) {
            tracing::warn!("Could not create config directory: {}", e);
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from file, or create default
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(_) => Ok(AppConfig::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
            // Keep a broken file around for the user to fix rather than overwriting it
            return Ok(AppConfig::default());
        }

        let config = AppConfig::default();
        let _ = config.save_to(path);
        Ok(config)
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut clean_config = self.clone();

        // Empty strings mean "unset"
        if clean_config.last_device_name.as_deref().map(str::trim).is_some_and(str::is_empty) {
            clean_config.last_device_name = None;
        }
        if clean_config.accent.as_deref().map(str::trim).is_some_and(str::is_empty) {
            clean_config.accent = None;
        }

        let content = toml::to_string_pretty(&clean_config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Timer and poller settings for the linking dialog, clamped to sane values
    pub fn link_settings(&self) -> LinkSettings {
        let interval = Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL);
        LinkSettings {
            lifetime_secs: self.qr_lifetime_secs.max(1),
            threshold_secs: self.expiring_threshold_secs,
            poll: PollConfig {
                interval,
                max_failures: self.max_poll_failures.filter(|n| *n > 0),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
