//! Configuration management for formsync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::models::{FormCatalog, SheetGroup};
use crate::sink::canonical_table_name;

/// Prefix of every environment variable read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "FORMSYNC_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Trigger authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Form source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Outbound retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Destination configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Run configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Sheet groups and their forms
    #[serde(default)]
    pub sheets: Vec<SheetGroup>,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix FORMSYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a key lookup using the FORMSYNC_ naming scheme
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Config::default();

        // Server
        if let Some(host) = var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = var("SERVER_PORT") {
            config.server.port = parse_var("SERVER_PORT", &port)?;
        }

        // Auth
        if let Some(token) = var("AUTH_TOKEN") {
            config.auth.token = Some(token);
        }
        if let Some(capacity) = var("RATE_LIMIT_CAPACITY") {
            config.auth.rate_limit.capacity = parse_var("RATE_LIMIT_CAPACITY", &capacity)?;
        }
        if let Some(window) = var("RATE_LIMIT_WINDOW_SECS") {
            config.auth.rate_limit.window_secs = parse_var("RATE_LIMIT_WINDOW_SECS", &window)?;
        }

        // Source
        if let Some(url) = var("SOURCE_BASE_URL") {
            config.source.base_url = Some(url);
        }
        if let Some(username) = var("SOURCE_USERNAME") {
            config.source.username = Some(username);
        }
        if let Some(api_key) = var("SOURCE_API_KEY") {
            config.source.api_key = Some(api_key);
        }
        if let Some(page_size) = var("SOURCE_PAGE_SIZE") {
            config.source.page_size = parse_var("SOURCE_PAGE_SIZE", &page_size)?;
        }
        if let Some(https_only) = var("SOURCE_HTTPS_ONLY") {
            config.source.https_only = https_only.parse().unwrap_or(true);
        }

        // Sink
        if let Some(kind) = var("SINK_KIND") {
            config.sink.kind = kind.parse().map_err(ConfigError::InvalidValue)?;
        }
        if let Some(path) = var("SINK_PATH") {
            config.sink.path = path;
        }

        // Sync
        if let Some(interval) = var("SYNC_INTERVAL_SECS") {
            config.sync.interval_secs = Some(parse_var("SYNC_INTERVAL_SECS", &interval)?);
        }
        if let Some(max) = var("SYNC_MAX_CONCURRENT_FORMS") {
            config.sync.max_concurrent_forms = parse_var("SYNC_MAX_CONCURRENT_FORMS", &max)?;
        }
        if let Some(sheets) = var("SHEETS") {
            config.sheets = serde_json::from_str(&sheets).map_err(|e| {
                ConfigError::Parse(format!("Failed to parse {}SHEETS: {}", ENV_PREFIX, e))
            })?;
        }

        // OTEL
        if let Some(enabled) = var("OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Some(endpoint) = var("OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        // Logging
        if let Some(level) = var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Check the configuration before serving
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.auth.token, "auth.token")?;
        self.validate_sync()
    }

    /// Check everything a sync run needs, without the trigger settings
    pub fn validate_sync(&self) -> Result<(), ConfigError> {
        require(&self.source.base_url, "source.base_url")?;
        require(&self.source.username, "source.username")?;
        require(&self.source.api_key, "source.api_key")?;

        if self.sheets.is_empty() {
            return Err(ConfigError::MissingRequired("sheets".to_string()));
        }

        if self.source.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "source.page_size must be greater than 0".to_string(),
            ));
        }
        if self.source.max_pages == 0 {
            return Err(ConfigError::InvalidValue(
                "source.max_pages must be greater than 0".to_string(),
            ));
        }
        if self.auth.rate_limit.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.rate_limit.capacity must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.sync.max_concurrent_forms == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.max_concurrent_forms must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut tables: HashMap<String, &str> = HashMap::new();
        for group in &self.sheets {
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate sheet group: {}",
                    group.name
                )));
            }
            for form in &group.forms {
                let table = form.destination_table.as_str();
                let canonical = canonical_table_name(self.sink.kind, table);
                match tables.get(&canonical) {
                    Some(&existing) if existing == table => {
                        return Err(ConfigError::InvalidValue(format!(
                            "duplicate destination table: {}",
                            table
                        )));
                    }
                    Some(&existing) => {
                        return Err(ConfigError::InvalidValue(format!(
                            "destination tables {} and {} map to the same {} table",
                            existing,
                            table,
                            self.sink.kind.as_str()
                        )));
                    }
                    None => {
                        tables.insert(canonical, table);
                    }
                }
            }
        }

        Ok(())
    }

    /// Catalog of the configured sheet groups
    pub fn catalog(&self) -> FormCatalog {
        FormCatalog::new(self.sheets.clone())
    }
}

fn require(value: &Option<String>, key: &str) -> Result<(), ConfigError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::MissingRequired(key.to_string())),
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}{}", ENV_PREFIX, name)))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Trigger authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Shared bearer token required by the trigger endpoint
    pub token: Option<String>,

    /// Sliding-window limiter for the trigger endpoint
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Sliding-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Admitted requests per window and identity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum number of tracked identities
    #[serde(default = "default_max_identities")]
    pub max_identities: usize,

    /// Interval of the idle identity cleanup task in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            capacity: default_capacity(),
            max_identities: default_max_identities(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_capacity() -> usize {
    10
}

fn default_max_identities() -> usize {
    10_000
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Form source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Endpoint listing form submissions
    pub base_url: Option<String>,

    /// API user name
    pub username: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum pages fetched per form
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Wall-clock budget per form in seconds
    #[serde(default = "default_form_budget")]
    pub form_budget_secs: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Refuse plain HTTP URLs
    #[serde(default = "default_https_only")]
    pub https_only: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            api_key: None,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            form_budget_secs: default_form_budget(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            https_only: default_https_only(),
        }
    }
}

fn default_page_size() -> u32 {
    1000
}

fn default_max_pages() -> u32 {
    1000
}

fn default_form_budget() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_https_only() -> bool {
    true
}

/// Retry configuration for outbound calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound of any single backoff in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,

    /// Response statuses treated as transient
    #[serde(default = "default_transient_statuses")]
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            transient_statuses: default_transient_statuses(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_transient_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

/// Destination store kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// One SQLite database, one table per form
    #[default]
    Sqlite,
    /// One directory, one CSV file per form
    Csv,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Sqlite => "sqlite",
            SinkKind::Csv => "csv",
        }
    }
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(SinkKind::Sqlite),
            "csv" => Ok(SinkKind::Csv),
            _ => Err(format!("Invalid sink kind: {}", s)),
        }
    }
}

/// Destination configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,

    /// Database file for `sqlite`, directory for `csv`
    #[serde(default = "default_sink_path")]
    pub path: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: default_sink_path(),
        }
    }
}

fn default_sink_path() -> String {
    "/data/formsync.db".to_string()
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Forms processed concurrently within one run
    #[serde(default = "default_max_concurrent_forms")]
    pub max_concurrent_forms: usize,

    /// Interval of scheduled runs, disabled when absent
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Delay before the first scheduled run in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Add jitter to the scheduled interval
    #[serde(default)]
    pub jitter: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_forms: default_max_concurrent_forms(),
            interval_secs: None,
            initial_delay_secs: default_initial_delay(),
            jitter: false,
        }
    }
}

fn default_max_concurrent_forms() -> usize {
    1
}

fn default_initial_delay() -> u64 {
    5
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "formsync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. Unknown variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
