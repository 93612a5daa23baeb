use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080/";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,

    #[error("Invalid {name} value: {message}")]
    InvalidValue { name: &'static str, message: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Origin of the REST and push endpoints.
    pub base_url: Url,
    /// Path of the server-sent event stream, relative to `base_url`.
    pub stream_path: String,
    /// Path prefix for client actions, relative to `base_url`.
    pub events_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub ack_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Conversations whose last event is at least this old are marked stale
    /// after a reconnect. Zero marks every synced conversation stale.
    pub staleness_threshold_secs: u64,
    pub fetch_retry_attempts: u32,
    pub fetch_retry_backoff_ms: u64,
}

impl ConnectionConfig {
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    #[must_use]
    pub const fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    pub item_height: f64,
    pub viewport_height: f64,
    pub buffer_rows: usize,
    pub scroll_throttle_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

/// The main configuration structure for JobChat clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub viewport: ViewportConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            server: ServerConfig {
                base_url: default_server_url(),
                stream_path: "api/stream".to_string(),
                events_path: "api/events".to_string(),
            },
            connection: ConnectionConfig {
                ack_timeout_ms: 10_000,
                reconnect_initial_ms: 500,
                reconnect_max_ms: 30_000,
                staleness_threshold_secs: 0,
                fetch_retry_attempts: 3,
                fetch_retry_backoff_ms: 250,
            },
            viewport: ViewportConfig {
                item_height: 72.0,
                viewport_height: 720.0,
                buffer_rows: 5,
                scroll_throttle_ms: 100,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Text,
            },
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only replace values still at their default, so a
    /// file always wins over the environment; `server_override` wins over
    /// both.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or parsed, when an
    /// environment variable holds an invalid value, or when the result fails
    /// basic validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        server_override: Option<Url>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::with_defaults();
        let mut config = match config_path {
            Some(path) => Self::read_file(path)?,
            None => defaults.clone(),
        };

        if config.server.base_url == defaults.server.base_url
            && let Ok(value) = env::var("JOBCHAT_SERVER_URL")
        {
            config.server.base_url = parse_base_url(&value).map_err(|message| {
                ConfigError::InvalidValue {
                    name: "JOBCHAT_SERVER_URL",
                    message,
                }
            })?;
        }
        if config.logging.level == defaults.logging.level
            && let Ok(level) = env::var("JOBCHAT_LOG_LEVEL")
        {
            config.logging.level = level;
        }
        if config.connection.ack_timeout_ms == defaults.connection.ack_timeout_ms
            && let Ok(value) = env::var("JOBCHAT_ACK_TIMEOUT_MS")
        {
            config.connection.ack_timeout_ms =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    name: "JOBCHAT_ACK_TIMEOUT_MS",
                    message: "must be a whole number of milliseconds".to_string(),
                })?;
        }
        if config.connection.staleness_threshold_secs
            == defaults.connection.staleness_threshold_secs
            && let Ok(value) = env::var("JOBCHAT_STALENESS_THRESHOLD_SECS")
        {
            config.connection.staleness_threshold_secs =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    name: "JOBCHAT_STALENESS_THRESHOLD_SECS",
                    message: "must be a whole number of seconds".to_string(),
                })?;
        }

        if let Some(url) = server_override {
            config.server.base_url = url;
        }

        if config.connection.ack_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ack_timeout_ms",
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(config)
    }

    fn read_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading configuration file");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
            }
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Validate the complete configuration, collecting every problem.
    ///
    /// # Errors
    /// Returns the list of validation messages when any check fails.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.server.base_url.scheme(), "http" | "https") {
            errors.push(format!(
                "Server URL must use http or https: {}",
                self.server.base_url
            ));
        }
        if self.connection.ack_timeout_ms == 0 {
            errors.push("Ack timeout must be greater than 0.".to_string());
        }
        if self.connection.reconnect_initial_ms > self.connection.reconnect_max_ms {
            errors.push("Reconnect initial backoff exceeds the maximum backoff.".to_string());
        }
        if !(self.viewport.item_height.is_finite() && self.viewport.item_height > 0.0) {
            errors.push("Viewport item height must be a positive number.".to_string());
        }
        if !(self.viewport.viewport_height.is_finite() && self.viewport.viewport_height >= 0.0) {
            errors.push("Viewport height must not be negative.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Resolve a path relative to the configured server origin.
    ///
    /// # Errors
    /// Returns a parse error when the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.server.base_url.join(path.trim_start_matches('/'))
    }
}

fn default_server_url() -> Url {
    // The literal is a valid absolute URL.
    Url::parse(DEFAULT_SERVER_URL).unwrap_or_else(|_| unreachable!("invalid default server URL"))
}

fn parse_base_url(value: &str) -> Result<Url, String> {
    let normalized = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    };
    Url::parse(&normalized).map_err(|err| err.to_string())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("JOBCHAT_SERVER_URL");
            env::remove_var("JOBCHAT_LOG_LEVEL");
            env::remove_var("JOBCHAT_ACK_TIMEOUT_MS");
            env::remove_var("JOBCHAT_STALENESS_THRESHOLD_SECS");
        }
    }

    const YAML: &str = r#"
server:
  base_url: "https://jobs.example.com/"
  stream_path: "api/stream"
  events_path: "api/events"
connection:
  ack_timeout_ms: 2500
  reconnect_initial_ms: 100
  reconnect_max_ms: 5000
  staleness_threshold_secs: 30
  fetch_retry_attempts: 2
  fetch_retry_backoff_ms: 50
viewport:
  item_height: 48.0
  viewport_height: 480.0
  buffer_rows: 3
  scroll_throttle_ms: 16
logging:
  level: "debug"
  format: "json"
"#;

    #[test]
    #[serial]
    fn test_load_config_with_defaults() {
        cleanup_env_vars();
        let config = Config::load_config(None, None).unwrap();

        assert_eq!(config, Config::with_defaults());
        assert_eq!(config.server.base_url.as_str(), DEFAULT_SERVER_URL);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_config_from_yaml_file() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("jobchat.yaml");
        fs::write(&config_file, YAML).unwrap();

        let config = Config::load_config(Some(config_file), None).unwrap();

        assert_eq!(config.server.base_url.as_str(), "https://jobs.example.com/");
        assert_eq!(config.connection.ack_timeout(), Duration::from_millis(2500));
        assert_eq!(config.connection.staleness_threshold(), Duration::from_secs(30));
        assert_eq!(config.viewport.buffer_rows, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_load_config_from_json_file() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("jobchat.json");
        let mut config = Config::with_defaults();
        config.logging.level = "warn".to_string();
        fs::write(&config_file, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load_config(Some(config_file), None).unwrap();
        assert_eq!(loaded.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_load_config_unsupported_format() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("jobchat.toml");
        fs::write(&config_file, "level = 'info'").unwrap();

        let result = Config::load_config(Some(config_file), None);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat)));
    }

    #[test]
    #[serial]
    fn test_load_config_malformed_yaml() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("bad.yaml");
        fs::write(&config_file, "server: [invalid yaml structure").unwrap();

        let result = Config::load_config(Some(config_file), None);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    #[serial]
    fn test_load_config_nonexistent_file() {
        cleanup_env_vars();
        let result = Config::load_config(Some(PathBuf::from("/nonexistent/jobchat.yaml")), None);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_defaults_only() {
        cleanup_env_vars();
        unsafe {
            env::set_var("JOBCHAT_SERVER_URL", "https://env.example.com");
            env::set_var("JOBCHAT_LOG_LEVEL", "trace");
            env::set_var("JOBCHAT_STALENESS_THRESHOLD_SECS", "45");
        }

        let from_env = Config::load_config(None, None).unwrap();
        assert_eq!(from_env.server.base_url.as_str(), "https://env.example.com/");
        assert_eq!(from_env.logging.level, "trace");
        assert_eq!(from_env.connection.staleness_threshold_secs, 45);

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("jobchat.yaml");
        fs::write(&config_file, YAML).unwrap();
        let from_file = Config::load_config(Some(config_file), None).unwrap();
        assert_eq!(from_file.server.base_url.as_str(), "https://jobs.example.com/");
        assert_eq!(from_file.logging.level, "debug");
        assert_eq!(from_file.connection.staleness_threshold_secs, 30);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_ack_timeout_environment() {
        cleanup_env_vars();
        unsafe {
            env::set_var("JOBCHAT_ACK_TIMEOUT_MS", "soon");
        }

        let result = Config::load_config(None, None);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid JOBCHAT_ACK_TIMEOUT_MS")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_server_override_takes_precedence() {
        cleanup_env_vars();
        unsafe {
            env::set_var("JOBCHAT_SERVER_URL", "https://env.example.com/");
        }

        let override_url = Url::parse("https://cli.example.com/").unwrap();
        let config = Config::load_config(None, Some(override_url.clone())).unwrap();
        assert_eq!(config.server.base_url, override_url);

        cleanup_env_vars();
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = Config::with_defaults();
        config.server.base_url = Url::parse("ftp://files.example.com/").unwrap();
        config.connection.reconnect_initial_ms = 60_000;
        config.viewport.item_height = 0.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("http or https")));
        assert!(errors.iter().any(|e| e.contains("item height")));
    }

    #[test]
    fn test_endpoint_joins_relative_paths() {
        let config = Config::with_defaults();
        let url = config.endpoint("/api/stream").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/stream");
    }
}
