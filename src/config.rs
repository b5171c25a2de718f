use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::db::StoreProvider;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Which directions a replication runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatorType {
    #[default]
    PushAndPull,
    Push,
    Pull,
}

impl ReplicatorType {
    pub fn pushes(&self) -> bool {
        matches!(self, ReplicatorType::PushAndPull | ReplicatorType::Push)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, ReplicatorType::PushAndPull | ReplicatorType::Pull)
    }
}

impl std::fmt::Display for ReplicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicatorType::PushAndPull => write!(f, "push_and_pull"),
            ReplicatorType::Push => write!(f, "push"),
            ReplicatorType::Pull => write!(f, "pull"),
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync Gateway database URL (e.g., "wss://gateway.example.com:4984/todos")
    pub url: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Keep replicating until stopped instead of a single pass
    pub continuous: bool,
    pub replicator_type: ReplicatorType,
    /// Skip server certificate verification so a gateway with a self-signed
    /// certificate can be reached. Any certificate is then accepted.
    pub accept_only_self_signed_certs: bool,
    /// Long-poll timeout for the remote changes feed, in seconds
    pub heartbeat_secs: u64,
    /// Consecutive failed attempts before giving up (0 = never)
    pub max_attempts: u32,
    /// Upper bound for the wait between attempts, in seconds
    pub max_attempt_wait_secs: u64,
    /// Run a one-shot sync after write commands (default: false)
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            continuous: true,
            replicator_type: ReplicatorType::PushAndPull,
            accept_only_self_signed_certs: false,
            heartbeat_secs: 150,
            max_attempts: 0,
            max_attempt_wait_secs: 600,
            auto_sync: false,
        }
    }
}

impl SyncConfig {
    /// Returns true if url, username and password are all present
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.username.is_some() && self.password.is_some()
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the `todos` database
    pub database_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_dir: Option<PathBuf>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut database_dir =
            ConfigValue::new(StoreProvider::default_directory(), ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.database_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                database_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("TODOS_DATABASE_DIR") {
            database_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("TODOS_SYNC_URL") {
            sync.url = Some(url);
        }
        if let Ok(username) = std::env::var("TODOS_SYNC_USERNAME") {
            sync.username = Some(username);
        }
        if let Ok(password) = std::env::var("TODOS_SYNC_PASSWORD") {
            sync.password = Some(password);
        }

        Ok(Self {
            database_dir,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/todos/
    /// - macOS: ~/Library/Application Support/todos/
    /// - Windows: %APPDATA%/todos/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("todos")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
