use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::credential::ModelCategory;
use super::evaluation::ScoreWeights;

/// Main configuration structure for speakeval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Recording storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Encryption of user-owned API keys
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Generative model endpoint and fallback order
    #[serde(default)]
    pub model_api: ModelApiConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Credential pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Background job configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Overall score weights
    #[serde(default)]
    pub scoring: ScoreWeights,

    /// Periodic maintenance configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_true(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".speakeval/speakeval.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation of file logs: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Recording storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Root directory recordings are read from
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Public base used to build client-fetchable recording URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".speakeval/recordings")
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/recordings".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Encryption of user-owned API keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretsConfig {
    /// Application-wide passphrase; user secrets are ignored when unset
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Name under which a user's own model key is stored
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
}

fn default_secret_name() -> String {
    "model_api_key".to_string()
}

/// A model in the fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub category: ModelCategory,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, category: ModelCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

/// Generative model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelApiConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Models in priority order, most capable first
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

fn default_model_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

const fn default_model_timeout_secs() -> u64 {
    240
}

const fn default_temperature() -> f32 {
    0.2
}

const fn default_max_output_tokens() -> u32 {
    16_384
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("gemini-2.5-pro", ModelCategory::Reasoning),
        ModelSpec::new("gemini-2.5-flash", ModelCategory::Speech),
        ModelSpec::new("gemini-2.0-flash-lite", ModelCategory::Lightweight),
    ]
}

impl Default for ModelApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            timeout_secs: default_model_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            models: default_models(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Attempts per (credential, model) pair on transient rate limits
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound on a server-suggested retry delay
    #[serde(default = "default_max_server_delay_ms")]
    pub max_server_delay_ms: u64,

    /// Wait suggested to clients when a job ends rate limited
    #[serde(default = "default_client_retry_after_secs")]
    pub client_retry_after_secs: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    2_000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_max_server_delay_ms() -> u64 {
    60_000
}

const fn default_client_retry_after_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_server_delay_ms: default_max_server_delay_ms(),
            client_retry_after_secs: default_client_retry_after_secs(),
        }
    }
}

/// Credential pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// How long a checkout holds a credential
    #[serde(default = "default_lock_minutes")]
    pub lock_minutes: i64,

    /// Most pool credentials one job may check out
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

const fn default_lock_minutes() -> i64 {
    5
}

const fn default_max_candidates() -> usize {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lock_minutes: default_lock_minutes(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobsConfig {
    /// Hard ceiling on a job's processing time
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
}

const fn default_watchdog_secs() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: default_watchdog_secs(),
        }
    }
}

/// Periodic maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

const fn default_maintenance_interval_secs() -> u64 {
    300
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}
