//! Configuration loading from the process environment.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Read `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `JWT_SECRET` and `BIND_ADDR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// In-memory storage, fixed secret, ephemeral port.
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            jwt_secret: "test-secret".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "DATABASE_MAX_CONNECTIONS",
                        reason: format!("expected a positive integer, got '{raw}'"),
                    });
                }
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let raw_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw_addr.trim().parse().map_err(|e| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: format!("{e}"),
        })?;

        Ok(Self {
            database_url,
            database_max_connections,
            jwt_secret,
            bind_addr,
        })
    }
}
