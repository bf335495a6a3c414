use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: PathBuf,
    /// Owner id stamped on records created from this device
    pub owner: String,
    pub api: ApiConfig,
    pub sync: SyncSettings,
}

/// Backend API credentials and endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
}

impl ApiConfig {
    /// Whether enough is configured to push to the backend.
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }
}

/// Processor tuning. Defaults match the mobile client's behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub batch_size: i64,
    pub retention_days: i64,
    pub stale_after_secs: i64,
    pub reclaim_after_secs: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            batch_size: 25,
            retention_days: 7,
            stale_after_secs: 300,
            reclaim_after_secs: 300,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            database_path: PathBuf::from(&home).join(".lume").join("lume.db"),
            owner: "default".to_string(),
            api: ApiConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        if let Ok(db_path) = std::env::var("LUME_DATABASE_PATH") {
            config.database_path = PathBuf::from(db_path);
        }
        if let Ok(owner) = std::env::var("LUME_OWNER") {
            config.owner = owner;
        }
        if let Ok(url) = std::env::var("LUME_API_URL") {
            config.api.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("LUME_API_KEY") {
            config.api.api_key = Some(key);
        }
        if let Ok(token) = std::env::var("LUME_API_TOKEN") {
            config.api.bearer_token = Some(token);
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/lume/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("lume")
            .join("config.yaml")
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
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
