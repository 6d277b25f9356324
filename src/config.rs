use std::env;

use derive_more::FromStr;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Compile-time CORS allow-list.
pub const ALLOWED_ORIGINS: &[&str] = &["https://app.example.com", "http://localhost:5173"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromStr, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .or_else(|_| env::var("NODE_ENV"))
            .map(|s| s.parse())
            .inspect_err(|_| warn!("no ENVIRONMENT/NODE_ENV set, defaulting to development"))
            .unwrap_or(Ok(Environment::Development))
            .unwrap_or_else(|_| {
                warn!("invalid ENVIRONMENT value, defaulting to development");
                Environment::Development
            })
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a valid u16: {0}")]
    InvalidPort(std::num::ParseIntError),
    #[error("MAX_CONCURRENT_CAMPAIGNS must be a positive integer: {0}")]
    InvalidConcurrency(std::num::ParseIntError),
}

/// Process-wide runtime configuration, loaded once at startup from the
/// environment (`PORT`, `LOG_LEVEL`, `NODE_ENV`/`ENVIRONMENT`).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub max_concurrent_campaigns: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(ConfigError::InvalidPort)?,
            Err(_) => 3000,
        };

        let max_concurrent_campaigns = match env::var("MAX_CONCURRENT_CAMPAIGNS") {
            Ok(raw) => raw.parse().map_err(ConfigError::InvalidConcurrency)?,
            Err(_) => 3,
        };

        Ok(Self {
            port,
            environment: Environment::from_env(),
            max_concurrent_campaigns,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
            max_concurrent_campaigns: 3,
        }
    }
}
