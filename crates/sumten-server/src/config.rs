use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ServerError;

/// Runtime settings, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Directory holding the browser client, served as the router fallback.
    pub static_dir: PathBuf,
    /// Live WebSocket connections accepted before upgrades get 503.
    pub max_connections: u32,
    pub db_pool_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "sqlite:sumten.db?mode=rwc".to_string(),
            static_dir: PathBuf::from("public"),
            max_connections: 100,
            db_pool_size: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            max_connections: parse_or(&lookup, "MAX_CONNECTIONS", defaults.max_connections)?,
            db_pool_size: parse_or(&lookup, "DB_POOL_SIZE", defaults.db_pool_size)?,
        })
    }

    /// Settings for tests: in-memory SQLite, everything else default.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ServerError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ServerError::InvalidConfig {
            reason: format!("{} has invalid value {:?}", key, raw),
        }),
    }
}
