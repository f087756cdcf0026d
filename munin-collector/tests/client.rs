//! Protocol tests for `NodeClient` against a scripted node.

mod common;

use std::time::Duration;

use common::{MockNode, Reply};
use munin_collector::{CollectorError, NodeClient, NodeConfig};

#[tokio::test]
async fn test_handshake_records_hostname() {
    let node = MockNode::start("web01").await;
    let mut client = NodeClient::new(node.config());

    assert!(!client.is_connected());
    assert_eq!(client.connect().await.unwrap(), "web01");
    assert!(client.is_connected());
    assert_eq!(client.hostname(), Some("web01"));
}

#[tokio::test]
async fn test_bad_banner_sends_no_command() {
    let node = MockNode::with_banner(Some("hello there\n".to_string())).await;
    node.reply("list", "cpu\n");
    let mut client = NodeClient::new(node.config());

    let err = client.list().await.unwrap_err();

    assert!(matches!(err, CollectorError::Protocol(_)), "{:?}", err);
    assert!(node.commands().is_empty());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_list() {
    let node = MockNode::start("web01").await;
    node.reply("list", "cpu memory  df\n");
    let mut client = NodeClient::new(node.config());

    let graphs = client.list().await.unwrap();

    assert_eq!(graphs, vec!["cpu", "memory", "df"]);
    assert_eq!(node.commands(), vec!["list"]);
}

#[tokio::test]
async fn test_list_error_marker() {
    let node = MockNode::start("web01").await;
    let mut client = NodeClient::new(node.config());

    // Unscripted commands get the node's "# Unknown command" reply.
    let err = client.list().await.unwrap_err();

    match err {
        CollectorError::Protocol(message) => {
            assert!(message.starts_with("Error getting items"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_list_read_failure_is_connection_error() {
    let node = MockNode::start("web01").await;
    node.reply_always("list", Reply::Hang);
    let config = NodeConfig {
        io_timeout_ms: 100,
        ..node.config()
    };
    let mut client = NodeClient::new(config);

    let err = client.list().await.unwrap_err();

    assert!(matches!(err, CollectorError::Connection(_)), "{:?}", err);
    assert_eq!(node.count("list"), 1);
}

#[tokio::test]
async fn test_config_and_fetch() {
    let node = MockNode::start("web01").await;
    node.reply(
        "config cpu",
        "graph_title CPU usage\ngraph_vlabel %\ncpu0.label CPU0\ncpu0.info User time\n.\n",
    )
    .reply("fetch cpu", "cpu0.value 10\ncpu1.value U\n.\n");
    let mut client = NodeClient::new(node.config());

    let config = client.graph_config("cpu").await.unwrap();
    assert_eq!(config.title(), "CPU usage");
    assert_eq!(config.attributes["graph_vlabel"], "%");
    assert_eq!(config.metrics["cpu0"].label(), "CPU0");
    assert_eq!(config.metrics["cpu0"].info(), "User time");

    let values = client.fetch("cpu").await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].metric, "cpu0");
    assert_eq!(values[0].value().unwrap(), 10.0);
    assert!(values[1].value().is_err());
}

#[tokio::test]
async fn test_unknown_service_is_empty() {
    let node = MockNode::start("web01").await;
    let mut client = NodeClient::new(node.config());

    let config = client.graph_config("nope").await.unwrap();
    assert!(config.metrics.is_empty());
    assert!(client.fetch("nope").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connection_is_reused() {
    let node = MockNode::start("web01").await;
    node.reply("list", "cpu\n")
        .reply("config cpu", "cpu0.label CPU0\n.\n")
        .reply("fetch cpu", "cpu0.value 1\n.\n");
    let mut client = NodeClient::new(node.config());

    client.list().await.unwrap();
    client.graph_config("cpu").await.unwrap();
    client.fetch("cpu").await.unwrap();
    client.list().await.unwrap();

    assert_eq!(node.connections(), 1);
    assert_eq!(
        node.commands(),
        vec!["list", "config cpu", "fetch cpu", "list"]
    );
}

#[tokio::test]
async fn test_reconnects_after_peer_close() {
    let node = MockNode::start("web01").await;
    node.reply_once("list", Reply::Close).reply("list", "cpu\n");
    let mut client = NodeClient::new(node.config());

    let graphs = client.list().await.unwrap();

    assert_eq!(graphs, vec!["cpu"]);
    assert_eq!(node.connections(), 2);
    assert_eq!(node.count("list"), 2);
}

#[tokio::test]
async fn test_gives_up_when_peer_keeps_closing() {
    let node = MockNode::start("web01").await;
    node.reply_always("list", Reply::Close);
    let mut client = NodeClient::new(node.config());

    let err = client.list().await.unwrap_err();

    match err {
        CollectorError::Connection(message) => {
            assert!(message.contains("after 2 attempt(s)"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(node.connections(), 2);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_retry_budget_is_configurable() {
    let node = MockNode::start("web01").await;
    node.reply_always("list", Reply::Close);
    let config = NodeConfig {
        max_retries: 3,
        ..node.config()
    };
    let mut client = NodeClient::new(config);

    assert!(client.list().await.is_err());
    assert_eq!(node.connections(), 4);

    let node = MockNode::start("web01").await;
    node.reply_always("list", Reply::Close);
    let config = NodeConfig {
        max_retries: 0,
        ..node.config()
    };
    let mut client = NodeClient::new(config);

    assert!(client.list().await.is_err());
    assert_eq!(node.connections(), 1);
}

#[tokio::test]
async fn test_truncated_response_is_retried_whole() {
    let node = MockNode::start("web01").await;
    node.reply_once(
        "config cpu",
        Reply::Truncate("graph_title CPU usage\ncpu0.label CPU0\n".to_string()),
    )
    .reply(
        "config cpu",
        "graph_title CPU usage\ncpu0.label CPU0\ncpu1.label CPU1\n.\n",
    );
    let mut client = NodeClient::new(node.config());

    let config = client.graph_config("cpu").await.unwrap();

    assert_eq!(config.metrics.len(), 2);
    assert_eq!(node.count("config cpu"), 2);
    assert_eq!(node.connections(), 2);
}

#[tokio::test]
async fn test_silent_node_times_out() {
    let node = MockNode::with_banner(None).await;
    let config = NodeConfig {
        connect_timeout_ms: 100,
        ..node.config()
    };
    let mut client = NodeClient::new(config);

    let err = client.list().await.unwrap_err();

    match err {
        CollectorError::Connection(message) => {
            assert!(message.contains("Timed out"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_stalled_response_times_out() {
    let node = MockNode::start("web01").await;
    node.reply_always("fetch cpu", Reply::Hang);
    let config = NodeConfig {
        io_timeout_ms: 100,
        ..node.config()
    };
    let mut client = NodeClient::new(config);

    let err = client.fetch("cpu").await.unwrap_err();

    assert!(matches!(err, CollectorError::Connection(_)), "{:?}", err);
    assert!(!client.is_connected());
    // Timeouts are not retried.
    assert_eq!(node.count("fetch cpu"), 1);
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut client = NodeClient::new(NodeConfig::with_address(address));
    let err = client.list().await.unwrap_err();

    assert!(matches!(err, CollectorError::Connection(_)), "{:?}", err);
}

#[tokio::test]
async fn test_abandoned_command_discards_connection() {
    let node = MockNode::start("web01").await;
    node.reply_once("fetch cpu", Reply::Hang).reply("list", "cpu\n");
    let mut client = NodeClient::new(node.config());

    let abandoned = tokio::time::timeout(Duration::from_millis(50), client.fetch("cpu")).await;
    assert!(abandoned.is_err());

    let graphs = client.list().await.unwrap();

    assert_eq!(graphs, vec!["cpu"]);
    assert_eq!(node.connections(), 2);
}

#[tokio::test]
async fn test_disconnect_then_command_reconnects() {
    let node = MockNode::start("web01").await;
    node.reply("list", "cpu\n");
    let mut client = NodeClient::new(node.config());

    client.list().await.unwrap();
    client.disconnect().await;
    assert!(!client.is_connected());

    client.list().await.unwrap();
    assert_eq!(node.connections(), 2);
    assert_eq!(node.count("list"), 2);
}
