//! Test doubles: a scripted Munin node and a recording registry.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use munin_collector::{GaugeHandle, Labels, MetricsRegistry, NodeConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock node answers a command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send the text verbatim.
    Body(String),
    /// Close the connection without answering.
    Close,
    /// Send part of a response, then close.
    Truncate(String),
    /// Never answer.
    Hang,
}

#[derive(Default)]
struct State {
    banner: Option<String>,
    once: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    commands: Vec<String>,
    connections: usize,
}

/// A Munin node on `127.0.0.1:<random port>` answering from a script.
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl MockNode {
    /// Start a node announcing `hostname`.
    pub async fn start(hostname: &str) -> Self {
        Self::with_banner(Some(format!("# munin node at {}\n", hostname))).await
    }

    /// Start a node sending an arbitrary banner, or none at all.
    pub async fn with_banner(banner: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            banner,
            ..Default::default()
        }));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, accept_state.clone()));
            }
        });

        Self { addr, state, task }
    }

    /// Address as `host:port`.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Node configuration pointing at this node with short timeouts.
    pub fn config(&self) -> NodeConfig {
        NodeConfig {
            connect_timeout_ms: 500,
            io_timeout_ms: 500,
            ..NodeConfig::with_address(self.address())
        }
    }

    /// Answer `command` with `body` every time.
    pub fn reply(&self, command: &str, body: &str) -> &Self {
        self.reply_always(command, Reply::Body(body.to_string()))
    }

    /// Answer `command` with `reply` every time.
    pub fn reply_always(&self, command: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .always
            .insert(command.to_string(), reply);
        self
    }

    /// Answer the next `command` with `reply`, before falling back to the
    /// permanent reply.
    pub fn reply_once(&self, command: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .once
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every command received, in order (`quit` excluded).
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// How many times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Number of accepted connections.
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, state: Arc<Mutex<State>>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    let banner = {
        let mut state = state.lock().unwrap();
        state.connections += 1;
        state.banner.clone()
    };

    let Some(banner) = banner else {
        tokio::time::sleep(Duration::from_secs(60)).await;
        return;
    };
    if write.write_all(banner.as_bytes()).await.is_err() {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let command = line.trim_end().to_string();
        if command == "quit" {
            return;
        }

        let reply = {
            let mut state = state.lock().unwrap();
            state.commands.push(command.clone());
            let once = state.once.get_mut(&command).and_then(VecDeque::pop_front);
            once.or_else(|| state.always.get(&command).cloned())
                .unwrap_or_else(|| Reply::Body(default_reply(&command)))
        };

        match reply {
            Reply::Body(body) => {
                if write.write_all(body.as_bytes()).await.is_err() {
                    return;
                }
            }
            Reply::Close => return,
            Reply::Truncate(partial) => {
                let _ = write.write_all(partial.as_bytes()).await;
                return;
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return;
            }
        }
    }
}

fn default_reply(command: &str) -> String {
    if command.starts_with("config ") || command.starts_with("fetch ") {
        "# Unknown service\n.\n".to_string()
    } else {
        "# Unknown command. Try cap, list, nodes, config, fetch, version, quit\n".to_string()
    }
}

/// A gauge that records every sample set on it.
#[derive(Clone, Debug)]
pub struct RecordedGauge {
    pub id: usize,
    pub name: String,
    samples: Arc<Mutex<Vec<(Labels, f64)>>>,
}

impl RecordedGauge {
    pub fn samples(&self) -> Vec<(Labels, f64)> {
        self.samples.lock().unwrap().clone()
    }
}

impl GaugeHandle for RecordedGauge {
    fn set(&self, labels: &Labels, value: f64) {
        self.samples.lock().unwrap().push((labels.clone(), value));
    }
}

/// Registry keeping every registration in order.
#[derive(Default)]
pub struct RecordingRegistry {
    gauges: Mutex<Vec<(String, String, RecordedGauge)>>,
    calls: AtomicUsize,
}

impl RecordingRegistry {
    /// `(name, help)` of every distinct gauge, in registration order.
    pub fn registrations(&self) -> Vec<(String, String)> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .map(|(name, help, _)| (name.clone(), help.clone()))
            .collect()
    }

    /// Number of `register` calls, repeated names included.
    pub fn register_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Samples set on the gauge `name`.
    pub fn samples(&self, name: &str) -> Vec<(Labels, f64)> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, gauge)| gauge.samples())
            .unwrap_or_default()
    }
}

impl MetricsRegistry for RecordingRegistry {
    type Gauge = RecordedGauge;

    fn register(&self, name: &str, help: &str, _label_names: &[&str]) -> RecordedGauge {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gauges = self.gauges.lock().unwrap();

        if let Some((_, _, gauge)) = gauges.iter().find(|(n, _, _)| n == name) {
            return gauge.clone();
        }

        let gauge = RecordedGauge {
            id: gauges.len(),
            name: name.to_string(),
            samples: Arc::default(),
        };
        gauges.push((name.to_string(), help.to_string(), gauge.clone()));
        gauge
    }
}

/// The label set every sample of `hostname` should carry.
pub fn labels_for(hostname: &str) -> Labels {
    Labels::from([
        ("collector".to_string(), "munin".to_string()),
        ("hostname".to_string(), hostname.to_string()),
    ])
}
