//! Configuration management for the link daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/link-daemon/config.toml`.
//! Configuration is resolved once at startup and handed to each component
//! behind an `Arc`; nothing re-reads it afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("poll_interval_ms must be between 1 and 60000, got {0}")]
    InvalidPollInterval(u64),

    #[error("xfer_root must not be empty")]
    EmptyXferRoot,

    #[error("leave_source_file_override must be \"true\" or \"false\", got {0:?}")]
    InvalidLeaveSourceOverride(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("plugin entries need a non-empty name")]
    EmptyPluginName,

    #[error("plugin {0} is listed more than once")]
    DuplicatePlugin(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Processing order given to plugins that do not specify one.
pub const DEFAULT_PROCESSING_ORDER: i32 = 100;

/// Main configuration structure for the link daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// File mover configuration.
    pub link: LinkConfig,

    /// Message transport configuration.
    pub transport: TransportConfig,

    /// Plugin descriptors, in registration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginEntry>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// File mover configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// How long the move engine idles when its queue is empty.
    pub poll_interval_ms: u64,

    /// Shared root holding one `<app>/outbox` and `<app>/inbox` pair per app.
    pub xfer_root: PathBuf,

    /// When set, replaces the request's own `leave_source_file` flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leave_source_file_override: Option<String>,

    /// Whether files may be sent to the platform deployment service.
    pub allow_deployment_destination: bool,
}

/// Message transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Unix socket the broker listens on. Defaults to [`crate::ipc::get_socket_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

/// Hook a plugin is allowed to take part in. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PluginPermissionName {
    LinkRequest,
    LinkResponse,
    All,
}

/// Descriptor for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginEntry {
    /// Name the plugin registers under.
    pub name: String,

    /// Lower values run first.
    pub processing_order: i32,

    /// Declared permissions.
    pub permissions: Vec<PluginPermissionName>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            xfer_root: default_xfer_root(),
            leave_source_file_override: None,
            allow_deployment_destination: false,
        }
    }
}

impl Default for PluginEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            processing_order: DEFAULT_PROCESSING_ORDER,
            permissions: vec![PluginPermissionName::All],
        }
    }
}

impl LinkConfig {
    /// Idle wait between queue drains.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured leave-source-file override as a boolean.
    ///
    /// Returns `None` when no override is configured or the value is not a
    /// boolean. [`Config::validate`] rejects the latter.
    pub fn leave_source_file(&self) -> Option<bool> {
        self.leave_source_file_override
            .as_deref()
            .and_then(parse_bool)
    }
}

/// Case-insensitive `true`/`false`, ignoring surrounding whitespace.
fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("link-daemon")
        .join("config.toml")
}

/// Returns the default shared transfer root.
fn default_xfer_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("link-daemon")
        .join("allxfer")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - LINK_XFER_ROOT: Override the shared transfer root
    /// - LINK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - LINK_LEAVE_SOURCE_FILE: Override the leave-source-file setting
    /// - LINK_POLL_INTERVAL_MS: Override the move engine idle interval
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("LINK_XFER_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding xfer_root from environment: {}", root);
                self.link.xfer_root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("LINK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(value) = std::env::var("LINK_LEAVE_SOURCE_FILE") {
            if !value.is_empty() {
                tracing::info!(
                    "Overriding leave_source_file_override from environment: {}",
                    value
                );
                self.link.leave_source_file_override = Some(value);
            }
        }

        if let Ok(value) = std::env::var("LINK_POLL_INTERVAL_MS") {
            if !value.is_empty() {
                match value.parse::<u64>() {
                    Ok(ms) => {
                        tracing::info!("Overriding poll_interval_ms from environment: {}", ms);
                        self.link.poll_interval_ms = ms;
                    }
                    Err(e) => {
                        tracing::warn!(
                            value = %value,
                            error = %e,
                            "Ignoring LINK_POLL_INTERVAL_MS"
                        );
                    }
                }
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.poll_interval_ms < 1 || self.link.poll_interval_ms > 60_000 {
            return Err(ConfigError::InvalidPollInterval(self.link.poll_interval_ms));
        }

        if self.link.xfer_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyXferRoot);
        }

        if let Some(value) = &self.link.leave_source_file_override {
            if !value.trim().is_empty() && parse_bool(value).is_none() {
                return Err(ConfigError::InvalidLeaveSourceOverride(value.clone()));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                return Err(ConfigError::EmptyPluginName);
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(ConfigError::DuplicatePlugin(plugin.name.clone()));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
