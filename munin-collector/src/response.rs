//! Parsers for Munin node responses.
//!
//! All functions here are pure: they take lines already read off the wire
//! (with or without their trailing newline) and turn them into typed values.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::{CollectorError, Result};

/// Line that terminates a multi-line response.
pub const TERMINATOR: &str = ".";

/// Prefix of the banner a node sends right after accepting a connection.
pub const BANNER_PREFIX: &str = "# munin node at ";

/// Graph-level key holding the human-readable graph title.
pub const GRAPH_TITLE: &str = "graph_title";

/// Per-metric field holding the metric label.
pub const LABEL: &str = "label";

/// Per-metric field holding the extended description.
pub const INFO: &str = "info";

/// Per-metric field carrying a sample in `fetch` output.
pub const VALUE: &str = "value";

/// Strip the line ending (`\n` or `\r\n`).
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Whether the line is the end-of-response sentinel.
pub fn is_terminator(line: &str) -> bool {
    trim_line(line) == TERMINATOR
}

/// Extract the hostname from the connection banner.
pub fn parse_banner(line: &str) -> Result<String> {
    let hostname = trim_line(line)
        .strip_prefix(BANNER_PREFIX)
        .map(str::trim)
        .filter(|hostname| !hostname.is_empty())
        .ok_or_else(|| CollectorError::protocol(format!("Unexpected line: {}", line.trim_end())))?;

    Ok(hostname.to_string())
}

/// Split the single `list` response line into graph identifiers.
pub fn parse_list(line: &str) -> Result<Vec<String>> {
    let line = trim_line(line);
    if line.starts_with('#') {
        return Err(CollectorError::protocol(format!(
            "Error getting items: {}",
            line
        )));
    }

    Ok(line.split_whitespace().map(str::to_string).collect())
}

/// Attributes of one metric, as described by `config <graph>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricConfig {
    /// `<metric>.label`
    pub label: Option<String>,
    /// `<metric>.info`
    pub info: Option<String>,
    /// Every other per-metric field (`type`, `draw`, `min`, `cdef`, ...).
    pub attributes: BTreeMap<String, String>,
}

impl MetricConfig {
    fn set(&mut self, field: &str, value: String) {
        match field {
            LABEL => self.label = Some(value),
            INFO => self.info = Some(value),
            _ => {
                self.attributes.insert(field.to_string(), value);
            }
        }
    }

    /// The label, or an empty string when the node did not send one.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or_default()
    }

    /// The info text, or an empty string when the node did not send one.
    pub fn info(&self) -> &str {
        self.info.as_deref().unwrap_or_default()
    }
}

/// Configuration of a graph: graph-level attributes plus every metric it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphConfig {
    /// `graph_title`
    pub title: Option<String>,
    /// Every other graph-level key (`graph_vlabel`, `graph_category`, ...).
    pub attributes: BTreeMap<String, String>,
    /// Metric configurations keyed by metric identifier.
    pub metrics: BTreeMap<String, MetricConfig>,
}

impl GraphConfig {
    /// Parse the body of a `config` response (terminator excluded).
    ///
    /// Comment lines are skipped. A key with exactly one `.` is a per-metric
    /// attribute, anything else is graph-level.
    pub fn parse<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = GraphConfig::default();

        for line in lines {
            let line = trim_line(line);
            if line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(key), Some(first)) = (parts.next(), parts.next()) else {
                return Err(CollectorError::protocol(format!(
                    "Line unexpected: {}",
                    line
                )));
            };
            let value = std::iter::once(first).chain(parts).collect::<Vec<_>>().join(" ");

            config.set(key, value);
        }

        Ok(config)
    }

    fn set(&mut self, key: &str, value: String) {
        let metric_field = key
            .split_once('.')
            .filter(|(metric, field)| !metric.is_empty() && !field.is_empty() && !field.contains('.'));

        match metric_field {
            Some((metric, field)) => {
                trace!(metric, field, value = %value, "metric attribute");
                self.metrics
                    .entry(metric.to_string())
                    .or_default()
                    .set(field, value);
            }
            None if key == GRAPH_TITLE => self.title = Some(value),
            None => {
                trace!(key, value = %value, "graph attribute");
                self.attributes.insert(key.to_string(), value);
            }
        }
    }

    /// The graph title, or an empty string when the node did not send one.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }
}

/// A `<metric>.value <raw>` line from a `fetch` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedValue {
    /// Metric identifier, local to the graph.
    pub metric: String,
    /// Unparsed value text.
    pub raw: String,
    /// The full line, kept for diagnostics.
    pub line: String,
}

impl FetchedValue {
    /// Parse the value as a 64-bit float.
    pub fn value(&self) -> Result<f64> {
        self.raw.parse::<f64>().map_err(|_| CollectorError::Parse {
            line: self.line.clone(),
            value: self.raw.clone(),
        })
    }
}

/// Parse the body of a `fetch` response (terminator excluded).
///
/// Malformed lines and fields other than `value` are skipped.
pub fn parse_fetch<'a, I>(lines: I) -> Vec<FetchedValue>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut values = Vec::new();

    for line in lines {
        let line = trim_line(line);
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            debug!("unexpected empty line");
            continue;
        };

        let Some((metric, field)) = key.split_once('.').filter(|(_, field)| !field.contains('.'))
        else {
            debug!(line, "unexpected line");
            continue;
        };

        if field != VALUE {
            trace!(line, "ignoring non-value field");
            continue;
        }

        values.push(FetchedValue {
            metric: metric.to_string(),
            raw: parts.collect::<Vec<_>>().join(" "),
            line: line.to_string(),
        });
    }

    values
}
