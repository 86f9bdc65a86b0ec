//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching shadowtrade.toml structure.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::adapters::venue::VenueSettings;
use crate::application::MonitorSettings;

/// Environment variable that overrides `[gateway] token_secret`
pub const TOKEN_SECRET_ENV: &str = "SHADOWTRADE_TOKEN_SECRET";

/// Main configuration structure matching shadowtrade.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSection,
    pub venue: VenueSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    pub accounts: AccountsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Monitor loop configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Seconds between cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Accounts fetched from the venue in parallel
    #[serde(default = "default_max_concurrent_accounts")]
    pub max_concurrent_accounts: usize,
    /// Start the timer when `run` starts
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_concurrent_accounts: default_max_concurrent_accounts(),
            auto_start: true,
        }
    }
}

/// Venue API configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct VenueSection {
    /// REST base URL (e.g. https://api.lnmarkets.com)
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// "mainnet" or "testnet"
    #[serde(default = "default_network")]
    pub network: String,
}

/// Realtime gateway configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// HMAC secret for user tokens. Prefer the environment override.
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            heartbeat_secs: default_heartbeat_secs(),
            token_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl GatewaySection {
    /// Get token secret with environment variable override
    /// Checks SHADOWTRADE_TOKEN_SECRET env var first, falls back to config value
    pub fn get_token_secret(&self) -> String {
        std::env::var(TOKEN_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.token_secret.clone())
    }
}

/// Storage configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Directory for snapshot files (`~` is expanded)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Write JSON snapshots so state survives restarts
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: true,
        }
    }
}

impl StorageSection {
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

/// Delivery queue configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Entries retried this many times are purged
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default_priority: default_priority(),
        }
    }
}

/// Audit log configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct AuditSection {
    /// Decisions kept in memory; older ones are evicted
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

/// Notification retention configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Account registry configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsSection {
    /// TOML file listing linked accounts and their credentials (NEVER commit this file!)
    pub file: String,
}

impl AccountsSection {
    pub fn file_path(&self) -> PathBuf {
        expand_path(&self.file)
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_accounts() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_token_ttl_hours() -> i64 {
    168
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_cleanup_interval_secs() -> u64 {
    600
}

fn default_priority() -> u8 {
    1
}

fn default_audit_capacity() -> usize {
    1000
}

fn default_retention_days() -> i64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("Could not expand path {}: {}", raw, e);
            PathBuf::from(raw)
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "monitor.interval_secs must be > 0".to_string(),
            ));
        }

        if self.monitor.max_concurrent_accounts == 0 {
            return Err(ConfigError::ValidationError(
                "monitor.max_concurrent_accounts must be > 0".to_string(),
            ));
        }

        if self.venue.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "venue.api_url must not be empty".to_string(),
            ));
        }

        if self.venue.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "venue.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.gateway.bind_addr.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.bind_addr must not be empty".to_string(),
            ));
        }

        if self.gateway.heartbeat_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.heartbeat_secs must be > 0".to_string(),
            ));
        }

        if self.gateway.token_ttl_hours <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "gateway.token_ttl_hours must be > 0, got {}",
                self.gateway.token_ttl_hours
            )));
        }

        if self.queue.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "queue.max_retries must be > 0".to_string(),
            ));
        }

        if self.queue.cleanup_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "queue.cleanup_interval_secs must be > 0".to_string(),
            ));
        }

        if self.audit.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "audit.capacity must be > 0".to_string(),
            ));
        }

        if self.notifications.retention_days <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "notifications.retention_days must be > 0, got {}",
                self.notifications.retention_days
            )));
        }

        if self.accounts.file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "accounts.file must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Token secret after the environment override. Only the commands that
    /// sign or verify tokens require it.
    pub fn token_secret(&self) -> Result<String, ConfigError> {
        let secret = self.gateway.get_token_secret();
        if secret.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "gateway.token_secret is empty; set it or {}",
                TOKEN_SECRET_ENV
            )));
        }
        Ok(secret)
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        MonitorSettings {
            interval: Duration::from_secs(config.monitor.interval_secs),
            max_concurrent_accounts: config.monitor.max_concurrent_accounts,
        }
    }
}

impl From<&Config> for VenueSettings {
    fn from(config: &Config) -> Self {
        VenueSettings {
            api_url: config.venue.api_url.clone(),
            timeout: Duration::from_secs(config.venue.timeout_secs),
            network: config.venue.network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[monitor]
interval_secs = 120
max_concurrent_accounts = 8
auto_start = false

[venue]
api_url = "https://api.lnmarkets.com"
network = "testnet"

[gateway]
bind_addr = "0.0.0.0:9000"
token_secret = "from-file"

[storage]
data_dir = "/tmp/shadowtrade"
persist = false

[queue]
max_retries = 3

[audit]
capacity = 50

[accounts]
file = "config/accounts.toml"

[logging]
level = "debug"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.monitor.interval_secs, 120);
        assert!(!config.monitor.auto_start);
        assert_eq!(config.venue.network, "testnet");
        assert_eq!(config.venue.timeout_secs, 30);
        assert_eq!(config.gateway.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.gateway.heartbeat_secs, 30);
        assert!(!config.storage.persist);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.cleanup_interval_secs, 600);
        assert_eq!(config.audit.capacity, 50);
        assert_eq!(config.notifications.retention_days, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
[venue]
api_url = "https://api.lnmarkets.com"

[accounts]
file = "accounts.toml"
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.monitor.interval_secs, 300);
        assert_eq!(config.monitor.max_concurrent_accounts, 4);
        assert!(config.monitor.auto_start);
        assert_eq!(config.venue.network, "mainnet");
        assert_eq!(config.gateway.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.gateway.token_ttl_hours, 168);
        assert_eq!(config.storage.data_dir, "data");
        assert!(config.storage.persist);
        assert_eq!(config.queue.default_priority, 1);
        assert_eq!(config.audit.capacity, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/shadowtrade.toml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_missing_required_section() {
        let file = write_config("[monitor]\ninterval_secs = 10\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            ("interval_secs = 120", "interval_secs = 0"),
            ("max_concurrent_accounts = 8", "max_concurrent_accounts = 0"),
            ("api_url = \"https://api.lnmarkets.com\"", "api_url = \"\""),
            ("bind_addr = \"0.0.0.0:9000\"", "bind_addr = \" \""),
            ("max_retries = 3", "max_retries = 0"),
            ("capacity = 50", "capacity = 0"),
        ];

        for (valid, invalid) in cases {
            let content = create_valid_config().replace(valid, invalid);
            let file = write_config(&content);
            let result = load_config(file.path());
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for `{}`",
                invalid
            );
        }
    }

    #[test]
    fn test_config_to_settings() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        let monitor = MonitorSettings::from(&config);
        assert_eq!(monitor.interval, Duration::from_secs(120));
        assert_eq!(monitor.max_concurrent_accounts, 8);

        let venue = VenueSettings::from(&config);
        assert_eq!(venue.api_url, "https://api.lnmarkets.com");
        assert_eq!(venue.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_token_secret_required() {
        let content = create_valid_config().replace("token_secret = \"from-file\"", "");
        let file = write_config(&content);
        let config = load_config(file.path()).unwrap();

        if std::env::var(TOKEN_SECRET_ENV).is_err() {
            assert!(matches!(
                config.token_secret(),
                Err(ConfigError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_paths_expand_home() {
        let storage = StorageSection {
            data_dir: "~/shadowtrade".to_string(),
            persist: true,
        };
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(storage.data_path(), PathBuf::from(home).join("shadowtrade"));
        }
    }
}
