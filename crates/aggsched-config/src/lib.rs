use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aggsched_types::MetricCatalog;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("Invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Location of the SQLite database holding both job rows and metric tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Directory of the database file. Defaults to the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Database file name.
    #[serde(default = "default_db_name")]
    pub name: String,
}

fn default_db_name() -> String {
    "scheduler.db".to_string()
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: default_db_name(),
        }
    }
}

impl SqliteConfig {
    /// Full path of the database file.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.path {
            Some(dir) => dir.clone(),
            None => ensure_config_dir()?,
        };
        Ok(dir.join(&self.name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Informational; all schedules are evaluated in UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Upper bound for bookkeeping and query calls made inside a firing.
    #[serde(default = "default_bookkeeping_timeout")]
    pub bookkeeping_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_bookkeeping_timeout() -> u64 {
    10
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            bookkeeping_timeout_secs: default_bookkeeping_timeout(),
        }
    }
}

/// Downstream result collector endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResultConfig {
    #[serde(default = "default_post_url")]
    pub url: String,
    #[serde(default = "default_post_port")]
    pub port: u16,
    #[serde(default = "default_post_path")]
    pub path: String,
    #[serde(default = "default_post_method")]
    pub method: String,
    /// Bound on a single post.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Overall ceiling configured on the HTTP client.
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
}

fn default_post_url() -> String {
    "http://127.0.0.1".to_string()
}

fn default_post_port() -> u16 {
    5000
}

fn default_post_path() -> String {
    "result".to_string()
}

fn default_post_method() -> String {
    "POST".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_client_timeout() -> u64 {
    300
}

impl Default for PostResultConfig {
    fn default() -> Self {
        Self {
            url: default_post_url(),
            port: default_post_port(),
            path: default_post_path(),
            method: default_post_method(),
            request_timeout_secs: default_request_timeout(),
            client_timeout_secs: default_client_timeout(),
        }
    }
}

impl PostResultConfig {
    /// `<url>:<port>/<path>`.
    pub fn endpoint(&self) -> String {
        format!(
            "{}:{}/{}",
            self.url.trim_end_matches('/'),
            self.port,
            self.path.trim_start_matches('/')
        )
    }
}

/// Fixed parameters of the query strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Date the today/yesterday/last-N-days windows are anchored to (`YYYY-MM-DD`).
    #[serde(default = "default_reference_date")]
    pub reference_date: String,
    /// `%W` week number selected by the recent_week strategy.
    #[serde(default = "default_recent_week")]
    pub recent_week: String,
    /// `%Y` year selected by the recent_week strategy.
    #[serde(default = "default_recent_year")]
    pub recent_year: String,
}

fn default_reference_date() -> String {
    "2022-12-22".to_string()
}

fn default_recent_week() -> String {
    "50".to_string()
}

fn default_recent_year() -> String {
    "2022".to_string()
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            reference_date: default_reference_date(),
            recent_week: default_recent_week(),
            recent_year: default_recent_year(),
        }
    }
}

impl StrategyConfig {
    pub fn reference_date(&self) -> Result<NaiveDate, ConfigError> {
        NaiveDate::parse_from_str(&self.reference_date, "%Y-%m-%d").map_err(|e| {
            ConfigError::Invalid {
                key: "strategy.reference_date",
                message: e.to_string(),
            }
        })
    }
}

/// Top-level aggsched configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggSchedConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub post_result: PostResultConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Tables, fields and options jobs may reference.
    #[serde(default)]
    pub metrics: MetricCatalog,
}

impl AggSchedConfig {
    /// Reject values that would only fail later, at firing time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.reference_date()?;
        if self.post_result.method.parse::<PostMethod>().is_err() {
            return Err(ConfigError::Invalid {
                key: "post_result.method",
                message: format!("unsupported method {}", self.post_result.method),
            });
        }
        if self.metrics.metrics.is_empty() {
            return Err(ConfigError::Invalid {
                key: "metrics",
                message: "at least one metric table is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Methods the collector may be called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostMethod {
    Post,
    Put,
    Patch,
}

impl std::str::FromStr for PostMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(PostMethod::Post),
            "PUT" => Ok(PostMethod::Put),
            "PATCH" => Ok(PostMethod::Patch),
            _ => Err(()),
        }
    }
}

/// Resolve the aggsched config directory (~/.aggsched/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".aggsched"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.aggsched/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<AggSchedConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<AggSchedConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(AggSchedConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: AggSchedConfig = json5::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
