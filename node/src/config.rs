//! Node configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `REDPANDA_BROKERS` | `localhost:9092` |
//! | `CONSUMER_GROUP` | the application identifier |
//! | `METRICS_ADDR` | `0.0.0.0:9090` |
//!
//! Replication identity and topics come from the `USERBRIDGE_*` variables read
//! by [`ReplicationConfig::from_lookup`].

use std::env;
use std::net::SocketAddr;
use userbridge_core::config::{ConfigError, ReplicationConfig};

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Instance identity and topic layout
    pub replication: ReplicationConfig,
    /// Bootstrap servers (comma-separated)
    pub brokers: String,
    /// Consumer group prefix for inbound subscriptions
    pub consumer_group: String,
    /// Prometheus listener address
    pub metrics_addr: SocketAddr,
}

impl NodeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let replication = ReplicationConfig::from_lookup(&lookup)?;
        let brokers = lookup("REDPANDA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string());
        let consumer_group =
            lookup("CONSUMER_GROUP").unwrap_or_else(|| replication.application.clone());
        let metrics_addr = lookup("METRICS_ADDR")
            .unwrap_or_else(|| "0.0.0.0:9090".to_string())
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("METRICS_ADDR: {e}")))?;

        if brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "REDPANDA_BROKERS must not be empty".to_string(),
            ));
        }

        Ok(Self {
            replication,
            brokers,
            consumer_group,
            metrics_addr,
        })
    }
}
