//! Configuration for a single Munin node.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CollectorError;

/// Default Munin node port.
pub const DEFAULT_PORT: u16 = 4949;

/// Connection and polling settings for one Munin node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node address as `host:port` (default: "127.0.0.1:4949").
    #[serde(default = "default_address")]
    pub address: String,

    /// Dial timeout in milliseconds, including the banner read.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout in milliseconds for every individual read or write.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// How many times a command is retried after the node closed the connection.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Glob patterns for graphs to fetch (empty = all).
    #[serde(default)]
    pub include_graphs: Vec<String>,

    /// Glob patterns for graphs to skip.
    #[serde(default)]
    pub exclude_graphs: Vec<String>,
}

fn default_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    1
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            max_retries: default_max_retries(),
            include_graphs: Vec::new(),
            exclude_graphs: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration for the given address with default settings.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Dial timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-operation I/O timeout as a [`Duration`].
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Total number of attempts a command gets, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CollectorError> {
        let port = self
            .address
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .map(|(_, port)| port);

        match port {
            Some(port) if port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(CollectorError::Config(format!(
                    "Invalid node address '{}', expected host:port",
                    self.address
                )));
            }
        }

        if self.connect_timeout_ms == 0 {
            return Err(CollectorError::Config(
                "connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.io_timeout_ms == 0 {
            return Err(CollectorError::Config(
                "io_timeout_ms must be > 0".to_string(),
            ));
        }

        for pattern in self.include_graphs.iter().chain(&self.exclude_graphs) {
            glob::Pattern::new(pattern).map_err(|e| {
                CollectorError::Config(format!("Invalid graph pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}
