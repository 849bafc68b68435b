//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    /// Host share of call revenue in percent (platform keeps the rest).
    pub host_share_percent: i64,
    /// Ongoing calls idle longer than this are force-ended by the sweeper.
    /// Zero disables the sweep.
    pub call_idle_timeout_secs: i64,
    /// How often the sweeper wakes up.
    pub sweep_interval_secs: u64,
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

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Billing and Sweep Settings ---
        let host_share_percent = parse_env_i64("HOST_SHARE_PERCENT", 70)?;
        if !(0..=100).contains(&host_share_percent) {
            return Err(ConfigError::InvalidValue(
                "HOST_SHARE_PERCENT".to_string(),
                format!("{} is not a percentage", host_share_percent),
            ));
        }
        let call_idle_timeout_secs = parse_env_i64("CALL_IDLE_TIMEOUT_SECS", 0)?;
        let sweep_interval_secs = parse_env_i64("SWEEP_INTERVAL_SECS", 60)?;
        if sweep_interval_secs < 0 {
            return Err(ConfigError::InvalidValue(
                "SWEEP_INTERVAL_SECS".to_string(),
                format!("{} is negative", sweep_interval_secs),
            ));
        }
        let sweep_interval_secs = sweep_interval_secs as u64;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            host_share_percent,
            call_idle_timeout_secs,
            sweep_interval_secs,
        })
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_sweep_interval_is_rejected() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/hostline_test");
        std::env::set_var("SWEEP_INTERVAL_SECS", "-5");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue(ref name, _) if name == "SWEEP_INTERVAL_SECS"
        ));

        std::env::remove_var("SWEEP_INTERVAL_SECS");
    }
}
