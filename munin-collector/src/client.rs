//! Command framing on top of a [`Connection`].
//!
//! The protocol is strictly request/response, so the client owns at most one
//! connection and every operation takes `&mut self`. A command whose
//! connection turns out to be closed by the node (idle timeout on the node side
//! is common) is retried on a fresh connection, up to the configured budget.

use tracing::{debug, trace};

use crate::config::NodeConfig;
use crate::connection::{Connection, Lookahead};
use crate::error::{CollectorError, Result};
use crate::response::{FetchedValue, GraphConfig, is_terminator, parse_fetch, parse_list};

/// Shape of the response a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    /// Exactly one line, no terminator (`list`).
    SingleLine,
    /// Lines up to the `.` terminator (`config`, `fetch`).
    Terminated,
}

/// Outcome of a single attempt at a command.
enum Exchange {
    Complete(Vec<String>),
    PeerClosed,
}

/// Client for one Munin node.
#[derive(Debug)]
pub struct NodeClient {
    config: NodeConfig,
    connection: Option<Connection>,
    hostname: Option<String>,
}

impl NodeClient {
    /// Create a client. No connection is opened until the first command.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            connection: None,
            hostname: None,
        }
    }

    /// Node address.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Hostname from the most recent successful handshake.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a fresh connection, closing any previous one, and return the hostname.
    pub async fn connect(&mut self) -> Result<&str> {
        self.disconnect().await;
        let connection = self.open().await?;
        Ok(self.connection.insert(connection).hostname())
    }

    /// Close the current connection, if any.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// `list`: graph identifiers served by the node.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let lines = self.request("list", Response::SingleLine).await?;
        let line = lines.first().map(String::as_str).unwrap_or_default();
        parse_list(line)
    }

    /// `config <graph>`: graph and metric attributes.
    pub async fn graph_config(&mut self, graph: &str) -> Result<GraphConfig> {
        let lines = self
            .request(&format!("config {}", graph), Response::Terminated)
            .await?;
        GraphConfig::parse(lines.iter().map(String::as_str))
    }

    /// `fetch <graph>`: current `.value` lines of the graph.
    pub async fn fetch(&mut self, graph: &str) -> Result<Vec<FetchedValue>> {
        let lines = self
            .request(&format!("fetch {}", graph), Response::Terminated)
            .await?;
        Ok(parse_fetch(lines.iter().map(String::as_str)))
    }

    /// Run a command with the bounded reconnect-and-retry policy.
    async fn request(&mut self, command: &str, response: Response) -> Result<Vec<String>> {
        let attempts = self.config.attempts();

        for attempt in 1..=attempts {
            match self.exchange(command, response).await {
                Ok(Exchange::Complete(lines)) => return Ok(lines),
                Ok(Exchange::PeerClosed) => {
                    debug!(
                        address = %self.config.address,
                        command,
                        attempt,
                        attempts,
                        "not connected anymore, closing connection"
                    );
                    self.disconnect().await;
                }
                Err(e) => {
                    self.disconnect().await;
                    return Err(e);
                }
            }
        }

        Err(CollectorError::connection(format!(
            "{} kept closing the connection, gave up on '{}' after {} attempt(s)",
            self.config.address, command, attempts
        )))
    }

    /// One attempt: send the command and read the whole response.
    async fn exchange(&mut self, command: &str, response: Response) -> Result<Exchange> {
        let connection = self.ready_connection().await?;

        if connection.send(command).await? == Lookahead::Closed {
            return Ok(Exchange::PeerClosed);
        }

        let mut lines = Vec::new();
        loop {
            let Some(line) = connection.read_line().await? else {
                return Ok(Exchange::PeerClosed);
            };

            match response {
                Response::SingleLine => {
                    lines.push(line);
                    break;
                }
                Response::Terminated if is_terminator(&line) => break,
                Response::Terminated => lines.push(line),
            }
        }

        connection.finish();
        trace!(command, lines = lines.len(), "response complete");
        Ok(Exchange::Complete(lines))
    }

    /// The open connection, dialing a new one when there is none or when the
    /// previous command was abandoned halfway through its response.
    async fn ready_connection(&mut self) -> Result<&mut Connection> {
        let connection = match self.connection.take() {
            Some(connection) if !connection.in_flight() => connection,
            stale => {
                if let Some(connection) = stale {
                    debug!(address = %self.config.address, "discarding connection with unread response");
                    connection.close().await;
                }
                self.open().await?
            }
        };

        Ok(self.connection.insert(connection))
    }

    async fn open(&mut self) -> Result<Connection> {
        let connection = Connection::connect(&self.config).await?;
        self.hostname = Some(connection.hostname().to_string());
        Ok(connection)
    }
}
