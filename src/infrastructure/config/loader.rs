use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Model list cannot be empty")]
    NoModels,

    #[error("Invalid lock_minutes: {0}. Must be at least 1")]
    InvalidLockMinutes(i64),

    #[error("Invalid max_candidates: {0}. Must be at least 1")]
    InvalidMaxCandidates(usize),

    #[error("Invalid watchdog_secs: {0}. Must be at least 1")]
    InvalidWatchdog(u64),

    #[error("Invalid score weight for {0}: {1}. Must be positive")]
    InvalidWeight(&'static str, f64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .speakeval/config.yaml (project config)
    /// 3. .speakeval/local.yaml (local overrides, optional)
    /// 4. Environment variables (SPEAKEVAL_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".speakeval")
    }

    /// Load configuration rooted at a specific config directory
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("SPEAKEVAL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, environment still applied
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SPEAKEVAL_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.model_api.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        if let Some(model) = config.model_api.models.iter().find(|m| m.name.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "model name cannot be empty (category {})",
                model.category
            )));
        }

        if config.pool.lock_minutes < 1 {
            return Err(ConfigError::InvalidLockMinutes(config.pool.lock_minutes));
        }
        if config.pool.max_candidates == 0 {
            return Err(ConfigError::InvalidMaxCandidates(config.pool.max_candidates));
        }
        if config.jobs.watchdog_secs == 0 {
            return Err(ConfigError::InvalidWatchdog(config.jobs.watchdog_secs));
        }

        for (name, weight) in [
            ("short_form", config.scoring.short_form),
            ("long_form", config.scoring.long_form),
            ("discussion", config.scoring.discussion),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::InvalidWeight(name, weight));
            }
        }

        if config.storage.public_base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "storage.public_base_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
