//! The metrics sink the collector publishes into.
//!
//! The collector never stores sample values itself. It registers one gauge per
//! discovered metric and sets values on the returned handles; storage,
//! exposition and concurrency are the registry's business.

use std::collections::HashMap;

/// Label name/value pairs attached to a sample.
pub type Labels = HashMap<String, String>;

/// A registered gauge.
pub trait GaugeHandle: Clone + Send + Sync + 'static {
    /// Set the value of the series identified by `labels`.
    fn set(&self, labels: &Labels, value: f64);
}

/// Registry of named gauges.
///
/// Implementations must be safe to share between collectors of different
/// nodes, and `register` must be idempotent per `name`: registering a name a
/// second time returns a handle to the existing gauge.
pub trait MetricsRegistry: Send + Sync + 'static {
    /// Handle type returned by [`register`](Self::register).
    type Gauge: GaugeHandle;

    /// Register (or look up) the gauge `name`.
    fn register(&self, name: &str, help: &str, label_names: &[&str]) -> Self::Gauge;
}
