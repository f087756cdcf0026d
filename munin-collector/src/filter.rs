//! Graph selection by glob pattern.

use crate::config::NodeConfig;

/// Decides which discovered graphs get fetched.
#[derive(Debug, Clone, Default)]
pub struct GraphFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl GraphFilter {
    /// Build a filter from the node configuration.
    ///
    /// Invalid patterns are dropped; [`NodeConfig::validate`] reports them.
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            include: compile(&config.include_graphs),
            exclude: compile(&config.exclude_graphs),
        }
    }

    /// Check if a graph should be fetched.
    pub fn should_include(&self, graph: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(graph)) {
            return false;
        }

        !self.exclude.iter().any(|p| p.matches(graph))
    }
}

fn compile(patterns: &[String]) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect()
}
