//! Mapping from discovered Munin metrics to registered gauges.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::client::NodeClient;
use crate::error::{CollectorError, Result};
use crate::registry::MetricsRegistry;
use crate::response::{GraphConfig, MetricConfig};

/// Value of the `collector` label on every sample.
pub const COLLECTOR_LABEL: &str = "munin";

/// Label names every gauge is registered with.
pub const LABEL_NAMES: [&str; 2] = ["collector", "hostname"];

/// Registry name for a metric of a graph: `graph-metric` with every `.` replaced by `_`.
pub fn metric_name(graph: &str, metric: &str) -> String {
    format!("{}-{}", graph, metric).replace('.', "_")
}

/// Help text for a metric: `<graph_title>: <label>`, plus `, <info>` when present.
pub fn describe(graph: &GraphConfig, metric: &MetricConfig) -> String {
    let mut description = format!("{}: {}", graph.title(), metric.label());
    if !metric.info().is_empty() {
        description.push_str(", ");
        description.push_str(metric.info());
    }
    description
}

/// Per-collector cache of registered gauges, keyed by [`metric_name`].
pub struct GaugeCache<R: MetricsRegistry> {
    registry: Arc<R>,
    gauges: HashMap<String, R::Gauge>,
}

impl<R: MetricsRegistry> GaugeCache<R> {
    /// Create an empty cache publishing into `registry`.
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            gauges: HashMap::new(),
        }
    }

    /// The cached gauge for a metric, if it was registered already.
    pub fn get(&self, graph: &str, metric: &str) -> Option<&R::Gauge> {
        self.gauges.get(&metric_name(graph, metric))
    }

    /// Number of cached gauges.
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    /// Whether no gauge was registered yet.
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Register a gauge for every metric of the graph that is not cached yet.
    ///
    /// Returns how many gauges were registered.
    pub fn register_graph(&mut self, graph: &str, config: &GraphConfig) -> usize {
        let mut registered = 0;

        for (metric, metric_config) in &config.metrics {
            let name = metric_name(graph, metric);
            if self.gauges.contains_key(&name) {
                continue;
            }

            let help = describe(config, metric_config);
            debug!(name = %name, help = %help, "Register");
            let gauge = self.registry.register(&name, &help, &LABEL_NAMES);
            self.gauges.insert(name, gauge);
            registered += 1;
        }

        registered
    }

    /// The gauge for `graph`/`metric`, registering the whole graph on a miss.
    ///
    /// A cache hit does no I/O. A miss fetches the graph configuration once and
    /// registers all of its metrics, so sibling metrics resolve from the cache.
    pub async fn resolve(
        &mut self,
        client: &mut NodeClient,
        graph: &str,
        metric: &str,
    ) -> Result<R::Gauge> {
        let name = metric_name(graph, metric);
        if let Some(gauge) = self.gauges.get(&name) {
            return Ok(gauge.clone());
        }

        let config = client.graph_config(graph).await?;
        let registered = self.register_graph(graph, &config);
        debug!(graph, registered, "registered graph metrics");

        self.gauges
            .get(&name)
            .cloned()
            .ok_or_else(|| CollectorError::NotFound {
                name,
                graph: graph.to_string(),
                metric: metric.to_string(),
            })
    }
}
