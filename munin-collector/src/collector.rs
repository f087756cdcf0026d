//! The update cycle for one Munin node.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::client::NodeClient;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::filter::GraphFilter;
use crate::gauges::{COLLECTOR_LABEL, GaugeCache, LABEL_NAMES};
use crate::registry::{GaugeHandle, Labels, MetricsRegistry};

/// Scrapes one Munin node into a [`MetricsRegistry`].
///
/// Owns its connection and its gauge cache. Nothing runs in the background:
/// the caller decides when to invoke [`update`](Self::update).
pub struct MuninCollector<R: MetricsRegistry> {
    client: NodeClient,
    gauges: GaugeCache<R>,
    filter: GraphFilter,
}

impl<R: MetricsRegistry> MuninCollector<R> {
    /// Create a collector for the node described by `config`.
    pub fn new(config: NodeConfig, registry: Arc<R>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            filter: GraphFilter::new(&config),
            client: NodeClient::new(config),
            gauges: GaugeCache::new(registry),
        })
    }

    /// Collector name used in logs.
    pub fn name(&self) -> &'static str {
        "munin_collector"
    }

    /// Address of the scraped node.
    pub fn address(&self) -> &str {
        self.client.address()
    }

    /// Hostname announced by the node, once connected.
    pub fn hostname(&self) -> Option<&str> {
        self.client.hostname()
    }

    /// Gauges registered so far.
    pub fn gauges(&self) -> &GaugeCache<R> {
        &self.gauges
    }

    /// Graphs served by the node.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        self.client.list().await
    }

    /// The gauge for `graph`/`metric`, registering the whole graph on first sight.
    pub async fn resolve(&mut self, graph: &str, metric: &str) -> Result<R::Gauge> {
        self.gauges.resolve(&mut self.client, graph, metric).await
    }

    /// Run one scrape: list graphs, fetch each, set the gauges.
    ///
    /// Failing to list or fetch aborts the cycle. A sample whose gauge cannot
    /// be resolved or whose value is not a number is skipped. Returns the
    /// number of samples applied.
    pub async fn update(&mut self) -> Result<usize> {
        let graphs = self.client.list().await?;
        let mut updates = 0;

        for graph in &graphs {
            if !self.filter.should_include(graph) {
                trace!(collector = self.name(), graph = %graph, "graph filtered out");
                continue;
            }

            debug!(collector = self.name(), graph = %graph, "fetching graph");
            let values = self.client.fetch(graph).await?;

            for fetched in values {
                let gauge = match self
                    .gauges
                    .resolve(&mut self.client, graph, &fetched.metric)
                    .await
                {
                    Ok(gauge) => gauge,
                    Err(e) if e.is_recoverable() => {
                        debug!(graph = %graph, error = %e, "skipping sample");
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            collector = self.name(),
                            graph = %graph,
                            metric = %fetched.metric,
                            error = %e,
                            "Couldn't resolve gauge"
                        );
                        continue;
                    }
                };

                let value = match fetched.value() {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(graph = %graph, error = %e, "malformed value, skipping sample");
                        continue;
                    }
                };

                let labels = self.labels();
                trace!(graph = %graph, metric = %fetched.metric, value, "Set");
                gauge.set(&labels, value);
                updates += 1;
            }
        }

        Ok(updates)
    }

    /// Close the connection to the node.
    pub async fn close(&mut self) {
        self.client.disconnect().await;
    }

    fn labels(&self) -> Labels {
        let [collector, hostname] = LABEL_NAMES;
        Labels::from([
            (collector.to_string(), COLLECTOR_LABEL.to_string()),
            (
                hostname.to_string(),
                self.client.hostname().unwrap_or_default().to_string(),
            ),
        ])
    }
}
