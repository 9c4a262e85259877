use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub logging: LoggingConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Empty means single-node mode with the in-process broker
    pub url: String,
    pub connect_timeout_seconds: u64,
    /// Startup ping attempts before giving up
    pub init_max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            connect_timeout_seconds: 5,
            init_max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 shared secret used to verify stream credentials
    pub secret: String,
    pub access_token_duration_minutes: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_duration_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub heartbeat_interval_seconds: u64,
    /// Outbound frames buffered per session before writes apply backpressure
    pub frame_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 15,
            frame_buffer: 256,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

/// Minimum accepted length of the JWT shared secret
const MIN_JWT_SECRET_LEN: usize = 16;

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // LIVETAIL_SERVER__HTTP_PORT, LIVETAIL_RELAY__HEARTBEAT_INTERVAL_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("LIVETAIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the settings the relay server cannot run without
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            errors.push(format!(
                "jwt.secret must be at least {MIN_JWT_SECRET_LEN} characters"
            ));
        }
        if self.jwt.access_token_duration_minutes == 0 {
            errors.push("jwt.access_token_duration_minutes must be non-zero".to_string());
        }
        if self.relay.heartbeat_interval_seconds == 0 {
            errors.push("relay.heartbeat_interval_seconds must be non-zero".to_string());
        }
        if self.relay.frame_buffer == 0 {
            errors.push("relay.frame_buffer must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// True when no Redis URL is configured
    #[must_use]
    pub fn is_single_node(&self) -> bool {
        self.redis.url.trim().is_empty()
    }
}

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. `LIVETAIL_CONFIG_PATH` environment variable (explicit path)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (Kubernetes mount path)
/// 4. Fall back to environment variables only
///
/// Runs before logging is initialized, so progress goes to stderr.
pub fn load_config() -> anyhow::Result<Config> {
    let config_path = std::env::var("LIVETAIL_CONFIG_PATH")
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        });

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            jwt: JwtConfig {
                secret: "0123456789abcdef0123".to_string(),
                ..JwtConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relay.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.http_address(), "0.0.0.0:8080");
        assert!(!config.is_single_node());
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.relay.heartbeat_interval_seconds = 0;
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("jwt.secret")));
        assert!(errors.iter().any(|e| e.contains("heartbeat")));
        assert!(errors.iter().any(|e| e.contains("logging.format")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  http_port: 9090\nredis:\n  url: \"\"\nrelay:\n  heartbeat_interval_seconds: 5"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.relay.heartbeat_interval_seconds, 5);
        assert_eq!(config.relay.frame_buffer, 256);
        assert!(config.is_single_node());
    }
}
