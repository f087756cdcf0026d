//! Error types for the Munin collector.

use thiserror::Error;

/// Result type alias using [`CollectorError`].
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors raised while talking to a Munin node.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Dial, transport or timeout failure, or the retry budget ran out.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The node sent something that does not follow the protocol grammar.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A sample value is not a number.
    #[error("Couldn't parse value '{value}' in line '{line}'")]
    Parse { line: String, value: String },

    /// `fetch` reported a metric that the graph's `config` does not describe.
    #[error("metric {name} ({metric}) not found in {graph} graph")]
    NotFound {
        name: String,
        graph: String,
        metric: String,
    },

    /// Invalid node configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CollectorError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the error only concerns a single sample.
    ///
    /// Recoverable errors are logged and the sample is skipped; all others abort
    /// the operation that raised them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::NotFound { .. })
    }
}
