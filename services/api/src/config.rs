//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which `CollectionStore` implementation backs the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("'{}' is not one of memory, postgres", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub achievements_path: PathBuf,
    pub store_timeout: Duration,
    pub store_conflict_retries: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Store Settings ---
        let store_backend = lookup("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse::<StoreBackend>()
            .map_err(|e| ConfigError::InvalidValue("STORE_BACKEND".to_string(), e))?;

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let store_timeout = Duration::from_millis(parse_number(&lookup, "STORE_TIMEOUT_MS", 5000)?);
        let store_conflict_retries: u32 = parse_number(&lookup, "STORE_CONFLICT_RETRIES", 5)?;
        if store_conflict_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "STORE_CONFLICT_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        // --- Achievement Catalog ---
        let achievements_path = lookup("ACHIEVEMENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./achievements.json"));

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            achievements_path,
            store_timeout,
            store_conflict_retries,
        })
    }
}

fn parse_number<F, N>(lookup: &F, key: &str, default: N) -> Result<N, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    N: FromStr,
    N::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<N>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let config = config_from(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.store_conflict_retries, 5);
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        assert!(matches!(config_from(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));

        let config = config_from(&[("DATABASE_URL", "postgres://localhost/progress")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            config_from(&[("STORE_BACKEND", "redis")]),
            Err(ConfigError::InvalidValue(v, _)) if v == "STORE_BACKEND"
        ));
        assert!(matches!(
            config_from(&[("STORE_BACKEND", "memory"), ("STORE_TIMEOUT_MS", "soon")]),
            Err(ConfigError::InvalidValue(v, _)) if v == "STORE_TIMEOUT_MS"
        ));
        assert!(matches!(
            config_from(&[("STORE_BACKEND", "memory"), ("STORE_CONFLICT_RETRIES", "0")]),
            Err(ConfigError::InvalidValue(v, _)) if v == "STORE_CONFLICT_RETRIES"
        ));
    }
}
