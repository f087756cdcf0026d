//! Prometheus exporter for Munin nodes.
//!
//! Polls one or more Munin nodes with [`munin_collector::MuninCollector`] and
//! exposes every discovered graph via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   munin-node    │────>│   NodePoller    │────>│  GaugeRegistry  │──> /metrics
//! │  (tcp/4949)     │     │ (one per node)  │     │   (series)      │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! munin-exporter-prometheus --config config.json5
//! munin-exporter-prometheus --address web01:4949 --once
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod scheduler;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use registry::{Gauge, GaugeRegistry, ScrapeStatus, SharedRegistry};
pub use scheduler::NodePoller;
