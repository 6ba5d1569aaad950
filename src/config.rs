//! Hub configuration
//!
//! Read from environment variables by the binary. The library itself only
//! consumes [`SessionOptions`].

use std::net::SocketAddr;
use std::time::Duration;

use crate::session::SessionOptions;

/// Hub configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket listener binds to
    pub listen_addr: SocketAddr,
    /// Per-session tuning
    pub session: SessionOptions,
    /// Upstream topics the station subscribes to. Empty disables the station.
    pub station_topics: Vec<String>,
    /// PostgreSQL connection string for the postgres bus
    pub database_url: Option<String>,
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("HUB_LISTEN_ADDR") {
            config.listen_addr = addr
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("HUB_LISTEN_ADDR", "expected host:port"))?;
        }

        if let Some(secs) = lookup("HUB_HEARTBEAT_SECS") {
            let secs: u64 = parse_positive("HUB_HEARTBEAT_SECS", &secs)?;
            config.session.heartbeat = Duration::from_secs(secs);
        }

        if let Some(capacity) = lookup("HUB_INBOUND_CAPACITY") {
            config.session.inbound_capacity = parse_positive("HUB_INBOUND_CAPACITY", &capacity)?;
        }

        if let Some(capacity) = lookup("HUB_OUTBOUND_CAPACITY") {
            config.session.outbound_capacity = parse_positive("HUB_OUTBOUND_CAPACITY", &capacity)?;
        }

        if let Some(capacity) = lookup("HUB_BROADCAST_CAPACITY") {
            config.session.broadcast_capacity =
                parse_positive("HUB_BROADCAST_CAPACITY", &capacity)?;
        }

        if let Some(topics) = lookup("HUB_STATION_TOPICS") {
            config.station_topics = topics
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(url) = lookup("HUB_DATABASE_URL")
            && !url.is_empty()
        {
            config.database_url = Some(url);
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session: SessionOptions::default(),
            station_topics: vec!["*".to_string()],
            database_url: None,
        }
    }
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::InvalidEnv(key, "expected a positive integer")),
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnv(&'static str, &'static str),
}
