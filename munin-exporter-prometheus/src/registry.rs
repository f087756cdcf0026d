//! Gauge registry that stores series and renders the Prometheus text format.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use munin_collector::{GaugeHandle, Labels, MetricsRegistry};

use crate::config::{AggregationConfig, PrometheusConfig};
use crate::mapping::{
    build_metric_name, escape_help, format_labels, format_value, sanitize_label_name,
};

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Registered gauges.
    pub gauges: usize,
    /// Live series across all gauges.
    pub series: usize,
    /// Values set, including updates of existing series.
    pub samples_set: u64,
    /// New series rejected because `max_series` was reached.
    pub series_dropped: u64,
    /// Series removed because they went stale.
    pub stale_series_removed: u64,
}

/// Outcome of the most recent scrape of a node.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeStatus {
    /// Node address.
    pub node: String,
    /// Hostname the node announced, if the handshake got that far.
    pub hostname: Option<String>,
    pub success: bool,
    /// Samples applied.
    pub samples: usize,
    pub duration_secs: f64,
    /// When the scrape finished.
    pub timestamp: DateTime<Utc>,
    /// When the node was last scraped successfully.
    pub last_success: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Names of the metrics the registry renders about itself, before the prefix.
const RESERVED_NAMES: [&str; 6] = [
    "scrape_success",
    "scrape_samples",
    "scrape_duration_seconds",
    "exporter_series_total",
    "exporter_series_dropped_total",
    "exporter_stale_series_removed_total",
];

/// State shared between the registry and its gauge handles.
#[derive(Debug)]
struct Shared {
    max_series: usize,
    stats: RwLock<RegistryStats>,
}

impl Shared {
    /// Reserve room for one more series.
    fn admit(&self) -> bool {
        let mut stats = self.stats.write();
        if stats.series >= self.max_series {
            stats.series_dropped += 1;
            return false;
        }
        stats.series += 1;
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    updated: Instant,
}

/// One registered gauge and its series, keyed by label values in the order
/// of `label_names`.
#[derive(Debug)]
struct GaugeFamily {
    name: String,
    /// Prometheus metric name, unique across the registry.
    exposed_name: String,
    help: String,
    label_names: Vec<String>,
    series: RwLock<BTreeMap<Vec<String>, Sample>>,
}

impl GaugeFamily {
    fn key(&self, labels: &Labels) -> Vec<String> {
        self.label_names
            .iter()
            .map(|name| labels.get(name).cloned().unwrap_or_default())
            .collect()
    }
}

/// Registered families and the exposed names already taken.
#[derive(Debug, Default)]
struct Families {
    by_name: BTreeMap<String, Arc<GaugeFamily>>,
    exposed: HashSet<String>,
}

impl Families {
    /// Take `base` as an exposed name, or `base_2`, `base_3`... when it is in use.
    fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.exposed.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.exposed.insert(candidate.clone());
        candidate
    }
}

/// Handle to a gauge of a [`GaugeRegistry`].
#[derive(Debug, Clone)]
pub struct Gauge {
    family: Arc<GaugeFamily>,
    shared: Arc<Shared>,
}

impl Gauge {
    /// Registry name of the gauge.
    pub fn name(&self) -> &str {
        &self.family.name
    }

    /// Name the gauge is rendered under.
    pub fn exposed_name(&self) -> &str {
        &self.family.exposed_name
    }

    /// Help text of the gauge.
    pub fn help(&self) -> &str {
        &self.family.help
    }

    /// Current value of the series identified by `labels`.
    pub fn get(&self, labels: &Labels) -> Option<f64> {
        let key = self.family.key(labels);
        self.family.series.read().get(&key).map(|s| s.value)
    }
}

impl GaugeHandle for Gauge {
    fn set(&self, labels: &Labels, value: f64) {
        let key = self.family.key(labels);
        let sample = Sample {
            value,
            updated: Instant::now(),
        };

        let mut series = self.family.series.write();
        if let Some(existing) = series.get_mut(&key) {
            *existing = sample;
        } else if self.shared.admit() {
            series.insert(key, sample);
        } else {
            warn!(
                gauge = %self.family.name,
                max_series = self.shared.max_series,
                "Max series limit reached, dropping new series"
            );
            return;
        }
        drop(series);

        trace!(gauge = %self.family.name, value, "Gauge set");
        self.shared.stats.write().samples_set += 1;
    }
}

/// Thread-safe gauge registry shared by every node collector and the HTTP
/// endpoint.
pub struct GaugeRegistry {
    families: RwLock<Families>,
    scrapes: RwLock<BTreeMap<String, ScrapeStatus>>,
    shared: Arc<Shared>,
    prefix: String,
    /// Sanitized and sorted by name.
    default_labels: Vec<(String, String)>,
    stale_timeout: Duration,
}

/// Shareable registry handle.
pub type SharedRegistry = Arc<GaugeRegistry>;

impl GaugeRegistry {
    /// Create an empty registry.
    pub fn new(prometheus: &PrometheusConfig, aggregation: &AggregationConfig) -> Self {
        let mut default_labels: Vec<(String, String)> = prometheus
            .default_labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();
        default_labels.sort();

        Self {
            families: RwLock::new(Families {
                by_name: BTreeMap::new(),
                exposed: RESERVED_NAMES
                    .iter()
                    .map(|name| build_metric_name(&prometheus.prefix, name))
                    .collect(),
            }),
            scrapes: RwLock::new(BTreeMap::new()),
            shared: Arc::new(Shared {
                max_series: aggregation.max_series,
                stats: RwLock::new(RegistryStats::default()),
            }),
            prefix: prometheus.prefix.clone(),
            default_labels,
            stale_timeout: aggregation.stale_timeout(),
        }
    }

    /// The gauge registered as `name`.
    pub fn gauge(&self, name: &str) -> Option<Gauge> {
        self.families.read().by_name.get(name).map(|family| Gauge {
            family: family.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Number of registered gauges.
    pub fn gauge_count(&self) -> usize {
        self.families.read().by_name.len()
    }

    /// Number of live series.
    pub fn series_count(&self) -> usize {
        self.shared.stats.read().series
    }

    /// Registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = self.shared.stats.read().clone();
        stats.gauges = self.gauge_count();
        stats
    }

    /// Remove series not updated within the configured stale timeout.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_older_than(self.stale_timeout)
    }

    /// Remove series not updated within `timeout`.
    pub fn cleanup_older_than(&self, timeout: Duration) -> usize {
        let families = self.families.read();
        let mut removed = 0;

        for family in families.by_name.values() {
            let mut series = family.series.write();
            let before = series.len();
            series.retain(|_, sample| sample.updated.elapsed() <= timeout);
            removed += before - series.len();
        }

        if removed > 0 {
            let mut stats = self.shared.stats.write();
            stats.series -= removed;
            stats.stale_series_removed += removed as u64;
            debug!(removed, remaining = stats.series, "Cleaned up stale series");
        }

        removed
    }

    /// Record the outcome of a scrape.
    pub fn record_scrape(&self, mut status: ScrapeStatus) {
        let mut scrapes = self.scrapes.write();

        if status.success {
            status.last_success = Some(status.timestamp);
        } else if let Some(previous) = scrapes.get(&status.node) {
            status.last_success = previous.last_success;
        }

        scrapes.insert(status.node.clone(), status);
    }

    /// Latest scrape status of every node, ordered by address.
    pub fn scrape_statuses(&self) -> Vec<ScrapeStatus> {
        self.scrapes.read().values().cloned().collect()
    }

    /// Whether any node was ever scraped successfully.
    pub fn is_ready(&self) -> bool {
        self.scrapes
            .read()
            .values()
            .any(|status| status.last_success.is_some())
    }

    /// Render every series in Prometheus exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for family in self.families.read().by_name.values() {
            let series = family.series.read();
            if series.is_empty() {
                continue;
            }

            let name = &family.exposed_name;
            writeln!(output, "# HELP {} {}", name, escape_help(&family.help)).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();

            let label_names: Vec<String> = family
                .label_names
                .iter()
                .map(|n| sanitize_label_name(n))
                .collect();

            for (values, sample) in series.iter() {
                let pairs: Vec<(&str, &str)> = label_names
                    .iter()
                    .map(String::as_str)
                    .zip(values.iter().map(String::as_str))
                    .collect();
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    self.series_labels(pairs),
                    format_value(sample.value)
                )
                .ok();
            }
        }

        self.render_scrapes(&mut output);
        self.render_stats(&mut output);
        output
    }

    fn render_scrapes(&self, output: &mut String) {
        let scrapes = self.scrapes.read();
        if scrapes.is_empty() {
            return;
        }

        let metrics: [(&str, &str, fn(&ScrapeStatus) -> f64); 3] = [
            (
                "scrape_success",
                "Whether the last scrape of the node succeeded.",
                |s| if s.success { 1.0 } else { 0.0 },
            ),
            (
                "scrape_samples",
                "Samples applied by the last scrape of the node.",
                |s| s.samples as f64,
            ),
            (
                "scrape_duration_seconds",
                "Duration of the last scrape of the node.",
                |s| s.duration_secs,
            ),
        ];

        for (suffix, help, value) in metrics {
            let name = build_metric_name(&self.prefix, suffix);
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            for status in scrapes.values() {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    self.series_labels(vec![("node", status.node.as_str())]),
                    format_value(value(status))
                )
                .ok();
            }
        }
    }

    fn render_stats(&self, output: &mut String) {
        let stats = self.stats();
        let counters = [
            ("exporter_series_total", "gauge", stats.series as u64),
            ("exporter_series_dropped_total", "counter", stats.series_dropped),
            (
                "exporter_stale_series_removed_total",
                "counter",
                stats.stale_series_removed,
            ),
        ];

        for (suffix, kind, value) in counters {
            let name = build_metric_name(&self.prefix, suffix);
            writeln!(output, "# TYPE {} {}", name, kind).ok();
            writeln!(output, "{} {}", name, value).ok();
        }
    }

    /// Series labels followed by the default labels they do not override.
    fn series_labels<'a>(&'a self, mut pairs: Vec<(&'a str, &'a str)>) -> String {
        for (name, value) in &self.default_labels {
            if !pairs.iter().any(|(n, _)| n == name) {
                pairs.push((name.as_str(), value.as_str()));
            }
        }
        format_labels(pairs)
    }
}

impl MetricsRegistry for GaugeRegistry {
    type Gauge = Gauge;

    fn register(&self, name: &str, help: &str, label_names: &[&str]) -> Gauge {
        let existing = self.families.read().by_name.get(name).cloned();
        let family = match existing {
            Some(family) => family,
            None => {
                let mut families = self.families.write();
                match families.by_name.get(name) {
                    Some(family) => family.clone(),
                    None => {
                        let base = build_metric_name(&self.prefix, name);
                        let exposed_name = families.claim(&base);
                        if exposed_name != base {
                            warn!(
                                name,
                                taken = %base,
                                exposed = %exposed_name,
                                "Metric name already in use, exposing gauge under a suffixed name"
                            );
                        }
                        debug!(name, help, exposed = %exposed_name, "Registering gauge");

                        let family = Arc::new(GaugeFamily {
                            name: name.to_string(),
                            exposed_name,
                            help: help.to_string(),
                            label_names: label_names.iter().map(|n| n.to_string()).collect(),
                            series: RwLock::new(BTreeMap::new()),
                        });
                        families.by_name.insert(name.to_string(), family.clone());
                        family
                    }
                }
            }
        };

        Gauge {
            family,
            shared: self.shared.clone(),
        }
    }
}
