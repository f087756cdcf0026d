//! Periodic scraping of Munin nodes and cleanup of stale series.

use std::time::{Duration, Instant};

use chrono::Utc;
use munin_collector::{MuninCollector, NodeConfig, Result};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::{GaugeRegistry, ScrapeStatus, SharedRegistry};

/// Drives the collector of one node on a fixed interval.
pub struct NodePoller {
    collector: MuninCollector<GaugeRegistry>,
    registry: SharedRegistry,
    interval: Duration,
}

impl NodePoller {
    /// Create a poller for `node`, publishing into `registry`.
    pub fn new(node: NodeConfig, registry: SharedRegistry, interval: Duration) -> Result<Self> {
        Ok(Self {
            collector: MuninCollector::new(node, registry.clone())?,
            registry,
            interval,
        })
    }

    /// Address of the polled node.
    pub fn address(&self) -> &str {
        self.collector.address()
    }

    /// Run one update cycle and record its outcome. Returns whether it succeeded.
    pub async fn scrape(&mut self) -> bool {
        let started = Instant::now();
        let result = self.collector.update().await;
        let duration = started.elapsed();

        let (success, samples, error) = match result {
            Ok(samples) => {
                debug!(
                    node = %self.address(),
                    samples,
                    duration_ms = duration.as_millis() as u64,
                    "Scrape complete"
                );
                (true, samples, None)
            }
            Err(e) => {
                warn!(node = %self.address(), error = %e, "Scrape failed");
                (false, 0, Some(e.to_string()))
            }
        };

        self.registry.record_scrape(ScrapeStatus {
            node: self.address().to_string(),
            hostname: self.collector.hostname().map(str::to_string),
            success,
            samples,
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
            last_success: None,
            error,
        });

        success
    }

    /// Scrape on every tick until the shutdown signal, then close the connection.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            node = %self.address(),
            interval_secs = self.interval.as_secs(),
            "Polling munin node"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scrape().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.collector.close().await;
        info!(node = %self.address(), "Poller stopped");
    }
}

/// Remove stale series every `period` until the shutdown signal.
pub async fn run_cleanup(
    registry: SharedRegistry,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.cleanup_stale();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
