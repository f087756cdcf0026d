//! Munin node collector.
//!
//! Polls a Munin node over its line-oriented text protocol and republishes the
//! graphs it discovers as gauges in a [`MetricsRegistry`].
//!
//! # Protocol
//!
//! ```text
//! <- # munin node at web01
//! -> list
//! <- cpu memory
//! -> config cpu
//! <- graph_title CPU usage
//! <- cpu0.label CPU0
//! <- .
//! -> fetch cpu
//! <- cpu0.value 10
//! <- .
//! ```
//!
//! # Metric names
//!
//! Every metric becomes one gauge named `<graph>-<metric>` with `.` replaced by
//! `_`, described as `<graph_title>: <label>[, <info>]`, and labelled with
//! `collector="munin"` and the node's `hostname`.

pub mod client;
pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod gauges;
pub mod registry;
pub mod response;

pub use client::NodeClient;
pub use collector::MuninCollector;
pub use config::{DEFAULT_PORT, NodeConfig};
pub use error::{CollectorError, Result};
pub use gauges::{GaugeCache, describe, metric_name};
pub use registry::{GaugeHandle, Labels, MetricsRegistry};
pub use response::{FetchedValue, GraphConfig, MetricConfig};
