//! Configuration parsing and validation for llm-relay.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables. Every setting has a default except the upstream
//! base URL.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every read of the raw value is
/// grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Upstream service, connection pool and retry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API, including any version segment
    /// (e.g., "http://llm.internal/v1")
    #[serde(default)]
    pub base_url: String,
    /// Fallback credential used when a request carries no Authorization header
    pub static_api_key: Option<ApiKey>,
    /// Connect timeout in seconds (also bounds the wait for a pool slot)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    /// Read timeout in seconds, measured from the last byte received
    #[serde(default = "default_read_timeout")]
    pub read_timeout: f64,
    /// Maximum idle connections kept for reuse
    #[serde(default = "default_max_keepalive")]
    pub max_keepalive: usize,
    /// Maximum simultaneously open upstream connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of retries after the first attempt
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
}

fn default_connect_timeout() -> f64 {
    5.0
}

fn default_read_timeout() -> f64 {
    600.0
}

fn default_max_keepalive() -> usize {
    100
}

fn default_max_connections() -> usize {
    200
}

fn default_retry_times() -> u32 {
    2
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            static_api_key: None,
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            max_keepalive: default_max_keepalive(),
            max_connections: default_max_connections(),
            retry_times: default_retry_times(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Environment variables recognized as configuration overrides.
pub const ENV_UPSTREAM_BASE_URL: &str = "UPSTREAM_BASE_URL";
pub const ENV_STATIC_API_KEY: &str = "STATIC_API_KEY";
pub const ENV_CONNECT_TIMEOUT: &str = "CONNECT_TIMEOUT";
pub const ENV_READ_TIMEOUT: &str = "READ_TIMEOUT";
pub const ENV_MAX_KEEPALIVE: &str = "MAX_KEEPALIVE";
pub const ENV_MAX_CONNECTIONS: &str = "MAX_CONNECTIONS";
pub const ENV_RETRY_TIMES: &str = "RETRY_TIMES";
pub const ENV_PORT: &str = "PORT";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

impl Config {
    /// Build configuration from process environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from defaults plus variables supplied by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env_with(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string without environment overrides.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any variables `lookup` can resolve.
    ///
    /// Empty values are ignored so that `STATIC_API_KEY=` behaves like unset.
    fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_UPSTREAM_BASE_URL) {
            self.upstream.base_url = url;
        }
        if let Some(key) = get(ENV_STATIC_API_KEY) {
            self.upstream.static_api_key = Some(ApiKey::from(key));
        }
        if let Some(raw) = get(ENV_CONNECT_TIMEOUT) {
            self.upstream.connect_timeout = parse_env(ENV_CONNECT_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_READ_TIMEOUT) {
            self.upstream.read_timeout = parse_env(ENV_READ_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_KEEPALIVE) {
            self.upstream.max_keepalive = parse_env(ENV_MAX_KEEPALIVE, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_CONNECTIONS) {
            self.upstream.max_connections = parse_env(ENV_MAX_CONNECTIONS, &raw)?;
        }
        if let Some(raw) = get(ENV_RETRY_TIMES) {
            self.upstream.retry_times = parse_env(ENV_RETRY_TIMES, &raw)?;
        }
        if let Some(raw) = get(ENV_PORT) {
            let port: u16 = parse_env(ENV_PORT, &raw)?;
            self.server.listen = format!("0.0.0.0:{}", port);
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.upstream.base_url;
        if base.is_empty() {
            return Err(ConfigError::Validation(format!(
                "upstream base URL is required (set {} or [upstream].base_url)",
                ENV_UPSTREAM_BASE_URL
            )));
        }
        let parsed = reqwest::Url::parse(base).map_err(|e| {
            ConfigError::Validation(format!("invalid upstream base URL '{}': {}", base, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "upstream base URL must be http or https, got '{}'",
                parsed.scheme()
            )));
        }

        for (name, value) in [
            ("connect_timeout", self.upstream.connect_timeout),
            ("read_timeout", self.upstream.read_timeout),
        ] {
            if value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::Validation(format!(
                    "{} must be a positive, finite number of seconds, got {}",
                    name, value
                )));
            }
        }

        if self.upstream.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Env {
        var: var.to_string(),
        value: raw.to_string(),
        message: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' has invalid value '{value}': {message}")]
    Env {
        var: String,
        value: String,
        message: String,
    },
}
