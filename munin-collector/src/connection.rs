//! A single TCP connection to a Munin node.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::NodeConfig;
use crate::error::{CollectorError, Result};
use crate::response::parse_banner;

/// What the lookahead after sending a command found on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookahead {
    /// Response bytes are available.
    Ready,
    /// The node closed its side of the connection.
    Closed,
}

/// An open, handshaken connection to a Munin node.
///
/// Dropping the connection closes the socket; [`Connection::close`] does the
/// same but says goodbye to the node first.
#[derive(Debug)]
pub struct Connection {
    address: String,
    hostname: String,
    reader: BufReader<TcpStream>,
    io_timeout: Duration,
    in_flight: bool,
}

impl Connection {
    /// Dial the node and validate its banner.
    pub async fn connect(config: &NodeConfig) -> Result<Self> {
        let address = config.address.clone();

        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| {
                CollectorError::connection(format!("Timed out connecting to {}", address))
            })?
            .map_err(|e| CollectorError::connection(format!("Couldn't connect to {}: {}", address, e)))?;

        let mut reader = BufReader::new(stream);
        let mut banner = String::new();
        let read = tokio::time::timeout(config.connect_timeout(), reader.read_line(&mut banner))
            .await
            .map_err(|_| {
                CollectorError::connection(format!("Timed out waiting for banner from {}", address))
            })?
            .map_err(|e| {
                CollectorError::connection(format!("Couldn't read banner from {}: {}", address, e))
            })?;

        if read == 0 {
            return Err(CollectorError::connection(format!(
                "{} closed the connection before sending a banner",
                address
            )));
        }

        let hostname = parse_banner(&banner)?;
        debug!(address = %address, hostname = %hostname, "Connected");

        Ok(Self {
            address,
            hostname,
            reader,
            io_timeout: config.io_timeout(),
            in_flight: false,
        })
    }

    /// Hostname announced in the banner.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Address this connection was dialed to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a command was sent whose response has not been fully read.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Send a command and peek at the stream without consuming anything.
    pub async fn send(&mut self, command: &str) -> Result<Lookahead> {
        trace!(address = %self.address, command, "sending command");
        self.in_flight = true;

        let line = format!("{}\n", command);
        let stream = self.reader.get_mut();
        let written = timed(self.io_timeout, &self.address, "write", async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        })
        .await?;

        if let Err(e) = written {
            return match e.kind() {
                kind if peer_closed(kind) => Ok(Lookahead::Closed),
                _ => Err(self.io_error("write", e)),
            };
        }

        let reader = &mut self.reader;
        let peeked = timed(self.io_timeout, &self.address, "read", async {
            reader.fill_buf().await.map(|buf| buf.is_empty())
        })
        .await?;

        match peeked {
            Ok(true) => Ok(Lookahead::Closed),
            Ok(false) => Ok(Lookahead::Ready),
            Err(e) if peer_closed(e.kind()) => Ok(Lookahead::Closed),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    /// Read one response line; `None` means the node closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = timed(
            self.io_timeout,
            &self.address,
            "read",
            self.reader.read_line(&mut line),
        )
        .await?;

        match read {
            Ok(0) => Ok(None),
            Ok(_) => {
                trace!(address = %self.address, line = line.trim_end(), "read");
                Ok(Some(line))
            }
            Err(e) if peer_closed(e.kind()) => Ok(None),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    /// Mark the current response as fully consumed.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Close the connection, sending `quit` first when the stream is idle.
    pub async fn close(mut self) {
        let idle = !self.in_flight;
        let stream = self.reader.get_mut();
        let _ = tokio::time::timeout(self.io_timeout, async {
            if idle {
                stream.write_all(b"quit\n").await?;
            }
            stream.shutdown().await
        })
        .await;
        debug!(address = %self.address, "Connection closed");
    }

    fn io_error(&self, operation: &str, error: std::io::Error) -> CollectorError {
        CollectorError::connection(format!(
            "Couldn't {} {}: {}",
            operation, self.address, error
        ))
    }
}

/// Run an I/O future under the connection's timeout.
async fn timed<F>(limit: Duration, address: &str, operation: &str, future: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout(limit, future).await.map_err(|_| {
        CollectorError::connection(format!(
            "Timed out after {:?} waiting to {} {}",
            limit, operation, address
        ))
    })
}

/// Error kinds that mean the node went away rather than the transport failing.
fn peer_closed(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    )
}
