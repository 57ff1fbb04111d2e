//! Configuration management
//!
//! Values come from the environment (optionally seeded from a `.env` file).
//! A value that is present but malformed is a fatal configuration error rather
//! than being silently replaced by its default.

use chrono::TimeDelta;
use doitrack_common::{DoiTrackError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/doitrack";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Registry Configuration Constants
// ============================================================================

/// Default registry endpoint for key lookups and submissions.
pub const DEFAULT_REGISTRY_LOOKUP_URL: &str = "https://www.osti.gov/elink/2416api";

/// Default registry endpoint serving formatted citation text.
pub const DEFAULT_REGISTRY_CITATION_URL: &str = "https://www.osti.gov/dataexplorer/api/v1/records";

/// Default per-request timeout in seconds.
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Stage Configuration Constants
// ============================================================================

/// Default requested batch size per stage run.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Records younger than this are not picked up by any stage (1 day).
pub const DEFAULT_GRACE_PERIOD_SECS: i64 = 86_400;

/// Delay between successive registry calls.
pub const DEFAULT_THROTTLE_MILLIS: u64 = 500;

/// Citation stage aborts once its error count exceeds this.
pub const DEFAULT_CITATION_ERROR_THRESHOLD: u32 = 3;

// ============================================================================
// Schedule Configuration Constants
// ============================================================================

pub const DEFAULT_VALIDATION_EVERY_SECS: u64 = 3_600;
pub const DEFAULT_CITATION_EVERY_SECS: u64 = 14_400;
pub const DEFAULT_MERGE_EVERY_SECS: u64 = 300;

/// Full pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub stage: StageConfig,
    pub schedule: ScheduleConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Registry endpoints and basic-auth credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub lookup_url: String,
    pub citation_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

/// Knobs shared by the three stages
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Requested batch size; may be non-positive, see `selector::BatchLimit::resolve`
    pub batch_size: i64,
    pub grace_period: TimeDelta,
    pub throttle: Duration,
    pub error_threshold: u32,
}

/// Cadences for `doitrack watch`
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub validation_every: Duration,
    pub citation_every: Duration,
    pub merge_every: Duration,
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from the process environment only
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            registry: RegistryConfig {
                lookup_url: env_string("REGISTRY_LOOKUP_URL", DEFAULT_REGISTRY_LOOKUP_URL),
                citation_url: env_string("REGISTRY_CITATION_URL", DEFAULT_REGISTRY_CITATION_URL),
                username: env_string("REGISTRY_USERNAME", ""),
                password: env_string("REGISTRY_PASSWORD", ""),
                timeout_secs: env_parse("REGISTRY_TIMEOUT_SECS", DEFAULT_REGISTRY_TIMEOUT_SECS)?,
            },
            stage: StageConfig {
                batch_size: env_parse("STAGE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                grace_period: grace_period(env_parse(
                    "STAGE_GRACE_PERIOD_SECS",
                    DEFAULT_GRACE_PERIOD_SECS,
                )?)?,
                throttle: Duration::from_millis(env_parse(
                    "STAGE_THROTTLE_MILLIS",
                    DEFAULT_THROTTLE_MILLIS,
                )?),
                error_threshold: env_parse(
                    "CITATION_ERROR_THRESHOLD",
                    DEFAULT_CITATION_ERROR_THRESHOLD,
                )?,
            },
            schedule: ScheduleConfig {
                validation_every: Duration::from_secs(env_parse(
                    "SCHEDULE_VALIDATION_SECS",
                    DEFAULT_VALIDATION_EVERY_SECS,
                )?),
                citation_every: Duration::from_secs(env_parse(
                    "SCHEDULE_CITATION_SECS",
                    DEFAULT_CITATION_EVERY_SECS,
                )?),
                merge_every: Duration::from_secs(env_parse(
                    "SCHEDULE_MERGE_SECS",
                    DEFAULT_MERGE_EVERY_SECS,
                )?),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate everything except registry credentials.
    ///
    /// Credentials are only required by commands that talk to the registry and
    /// are checked by [`RegistryConfig::validate`] when the client is built.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(config_error("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(config_error("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(config_error(format!(
                "DATABASE_MIN_CONNECTIONS ({}) cannot be greater than DATABASE_MAX_CONNECTIONS ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.stage.grace_period < TimeDelta::zero() {
            return Err(config_error("STAGE_GRACE_PERIOD_SECS cannot be negative"));
        }

        for (name, every) in [
            ("SCHEDULE_VALIDATION_SECS", self.schedule.validation_every),
            ("SCHEDULE_CITATION_SECS", self.schedule.citation_every),
            ("SCHEDULE_MERGE_SECS", self.schedule.merge_every),
        ] {
            if every.is_zero() {
                return Err(config_error(format!("{} must be greater than 0", name)));
            }
        }

        Ok(())
    }
}

impl RegistryConfig {
    /// Credentials must be present and both endpoints must be absolute URLs
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(config_error(
                "REGISTRY_USERNAME and REGISTRY_PASSWORD must both be set",
            ));
        }

        for (name, value) in [
            ("REGISTRY_LOOKUP_URL", &self.lookup_url),
            ("REGISTRY_CITATION_URL", &self.citation_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| config_error(format!("{} is not a valid URL ({}): {}", name, value, e)))?;
        }

        if self.timeout_secs == 0 {
            return Err(config_error("REGISTRY_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("lookup_url", &self.lookup_url)
            .field("citation_url", &self.citation_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            grace_period: TimeDelta::seconds(DEFAULT_GRACE_PERIOD_SECS),
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MILLIS),
            error_threshold: DEFAULT_CITATION_ERROR_THRESHOLD,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            validation_every: Duration::from_secs(DEFAULT_VALIDATION_EVERY_SECS),
            citation_every: Duration::from_secs(DEFAULT_CITATION_EVERY_SECS),
            merge_every: Duration::from_secs(DEFAULT_MERGE_EVERY_SECS),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

fn config_error(message: impl Into<String>) -> DoiTrackError {
    DoiTrackError::Config(message.into())
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| config_error(format!("{} has invalid value '{}': {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}

fn grace_period(secs: i64) -> Result<TimeDelta> {
    TimeDelta::try_seconds(secs)
        .ok_or_else(|| config_error(format!("STAGE_GRACE_PERIOD_SECS out of range: {}", secs)))
}
