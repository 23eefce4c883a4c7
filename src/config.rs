use crate::cli::Cli;
use crate::error::XmlError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Browser-style identification; some servers refuse requests from unknown agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_MAX_SIZE_MB: u64 = 100;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

impl From<ConfigError> for XmlError {
    fn from(err: ConfigError) -> Self {
        XmlError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub download: FetchProfile,
    pub stream: StreamConfig,
    pub analysis: FetchProfile,
}

/// Settings shared by every use case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,
    /// Maximum document size in MiB
    pub max_size_mb: u64,
}

/// Timeout and chunking for one use case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchProfile {
    /// Bound on connect plus full body transfer, in seconds
    pub timeout_seconds: u64,
    pub chunk_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub timeout_seconds: u64,
    pub chunk_size_bytes: usize,
    /// Chunks the producer may run ahead of the consumer (1-4)
    pub queue_depth: usize,
    /// Log the depth-balance probe every this many chunks
    pub probe_interval_chunks: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_size_mb: DEFAULT_MAX_SIZE_MB,
        }
    }
}

impl FetchProfile {
    pub fn download() -> Self {
        Self {
            timeout_seconds: 30,
            chunk_size_bytes: 1024 * 1024,
        }
    }

    pub fn analysis() -> Self {
        Self {
            timeout_seconds: 60,
            chunk_size_bytes: 8 * 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            chunk_size_bytes: 8 * 1024,
            queue_depth: 2,
            probe_interval_chunks: 10,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            network: NetworkConfig::default(),
            download: FetchProfile::download(),
            stream: StreamConfig::default(),
            analysis: FetchProfile::analysis(),
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.network.max_size_mb.saturating_mul(MIB)
    }

    pub fn download_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.download.timeout_seconds),
            max_size: self.max_size_bytes(),
            chunk_size: self.download.chunk_size_bytes,
        }
    }

    pub fn stream_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.stream.timeout_seconds),
            max_size: self.max_size_bytes(),
            chunk_size: self.stream.chunk_size_bytes,
        }
    }

    pub fn analysis_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.analysis.timeout_seconds),
            max_size: self.max_size_bytes(),
            chunk_size: self.analysis.chunk_size_bytes,
        }
    }
}

/// Bounds applied to a single fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_size: u64,
    pub chunk_size: usize,
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::new();

        if let Some(config_path) = &cli.config {
            config = Self::load_from_file(config_path).await?;
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = found_config;
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON); omitted sections keep their defaults
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str::<Config>(&content)?),
            Some("json") => Ok(serde_json::from_str::<Config>(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str::<Config>(&content)?),
            },
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "xml-fetch.toml",
            "xml-fetch.json",
            ".xml-fetch.toml",
            ".xml-fetch.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xml-fetch");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(user_agent) = env.get("XML_FETCH_USER_AGENT") {
            config.network.user_agent = user_agent;
        }

        if let Some(max_size) = env.get("XML_FETCH_MAX_SIZE_MB") {
            config.network.max_size_mb = parse_env("XML_FETCH_MAX_SIZE_MB", &max_size)?;
        }

        if let Some(timeout) = env.get("XML_FETCH_DOWNLOAD_TIMEOUT") {
            config.download.timeout_seconds = parse_env("XML_FETCH_DOWNLOAD_TIMEOUT", &timeout)?;
        }

        if let Some(timeout) = env.get("XML_FETCH_STREAM_TIMEOUT") {
            config.stream.timeout_seconds = parse_env("XML_FETCH_STREAM_TIMEOUT", &timeout)?;
        }

        if let Some(timeout) = env.get("XML_FETCH_ANALYSIS_TIMEOUT") {
            config.analysis.timeout_seconds = parse_env("XML_FETCH_ANALYSIS_TIMEOUT", &timeout)?;
        }

        if let Some(depth) = env.get("XML_FETCH_STREAM_QUEUE_DEPTH") {
            config.stream.queue_depth = parse_env("XML_FETCH_STREAM_QUEUE_DEPTH", &depth)?;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(timeout) = cli.timeout {
            config.download.timeout_seconds = timeout;
            config.stream.timeout_seconds = timeout;
            config.analysis.timeout_seconds = timeout;
        }
        if let Some(max_size_mb) = cli.max_size_mb {
            config.network.max_size_mb = max_size_mb;
        }
        if let Some(user_agent) = &cli.user_agent {
            config.network.user_agent = user_agent.clone();
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.network.max_size_mb == 0 {
            return Err(ConfigError::Validation(
                "Maximum document size must be greater than 0".to_string(),
            ));
        }

        if config.network.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "User agent cannot be empty".to_string(),
            ));
        }

        let profiles = [
            ("download", config.download.timeout_seconds, config.download.chunk_size_bytes),
            ("stream", config.stream.timeout_seconds, config.stream.chunk_size_bytes),
            ("analysis", config.analysis.timeout_seconds, config.analysis.chunk_size_bytes),
        ];
        for (name, timeout, chunk_size) in profiles {
            if timeout == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} timeout must be greater than 0",
                    name
                )));
            }
            if chunk_size == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} chunk size must be greater than 0",
                    name
                )));
            }
        }

        if !(1..=4).contains(&config.stream.queue_depth) {
            return Err(ConfigError::Validation(format!(
                "Stream queue depth must be between 1 and 4, got {}",
                config.stream.queue_depth
            )));
        }

        if config.stream.probe_interval_chunks == 0 {
            return Err(ConfigError::Validation(
                "Probe interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
