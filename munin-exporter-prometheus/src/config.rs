//! Configuration for the Prometheus exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use munin_collector::NodeConfig;
use munin_common::LoggingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] munin_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Munin nodes to poll.
    #[serde(default)]
    pub munin: MuninConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Series retention settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuninConfig {
    /// Seconds between two scrapes of the same node (default: 60).
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Nodes to poll (default: a single node on localhost).
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,
}

fn default_scrape_interval() -> u64 {
    60
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![NodeConfig::default()]
}

impl Default for MuninConfig {
    fn default() -> Self {
        Self {
            scrape_interval_secs: default_scrape_interval(),
            nodes: default_nodes(),
        }
    }
}

impl MuninConfig {
    /// Interval between scrapes.
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9103").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all series.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: "munin").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9103".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "munin".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
        }
    }
}

/// Series retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// How long a series survives without updates (seconds).
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,

    /// Maximum unique series across all gauges.
    #[serde(default = "default_max_series")]
    pub max_series: usize,

    /// How often stale series are removed (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_stale_timeout() -> u64 {
    900 // 15 minutes, a few missed munin cycles
}

fn default_max_series() -> usize {
    100_000
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: default_stale_timeout(),
            max_series: default_max_series(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl AggregationConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = munin_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = munin_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the node list with a single node at `address`, keeping the
    /// settings of the first configured node.
    pub fn override_address(&mut self, address: &str) {
        let template = self.munin.nodes.first().cloned().unwrap_or_default();
        self.munin.nodes = vec![NodeConfig {
            address: address.to_string(),
            ..template
        }];
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.munin.nodes.is_empty() {
            return Err(ConfigError::Validation(
                "at least one munin node must be configured".to_string(),
            ));
        }

        for node in &self.munin.nodes {
            node.validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }

        if self.munin.scrape_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_interval_secs must be > 0".to_string(),
            ));
        }

        if self.aggregation.stale_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "stale_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.aggregation.max_series == 0 {
            return Err(ConfigError::Validation(
                "max_series must be > 0".to_string(),
            ));
        }

        if self.aggregation.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup_interval_secs must be > 0".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}
