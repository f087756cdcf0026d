//! Prometheus exporter for Munin nodes.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use munin_exporter_prometheus::scheduler::run_cleanup;
use munin_exporter_prometheus::{ExporterConfig, GaugeRegistry, HttpServer, NodePoller};

/// Prometheus exporter for Munin nodes.
#[derive(Parser, Debug)]
#[command(name = "munin-exporter-prometheus")]
#[command(about = "Export Munin node graphs as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Munin node address as host:port (replaces the configured nodes).
    #[arg(short, long)]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides config.
    #[arg(long)]
    log_level: Option<String>,

    /// Scrape every node once, print the metrics and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)?,
        None => ExporterConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(address) = &args.address {
        config.override_address(address);
    }
    config.validate()?;

    munin_common::init_tracing(&config.logging.with_level_override(args.log_level.as_deref()))?;

    info!(nodes = config.munin.nodes.len(), "Starting Munin Prometheus Exporter");

    let registry = Arc::new(GaugeRegistry::new(&config.prometheus, &config.aggregation));

    let mut pollers = Vec::with_capacity(config.munin.nodes.len());
    for node in &config.munin.nodes {
        pollers.push(NodePoller::new(
            node.clone(),
            registry.clone(),
            config.munin.scrape_interval(),
        )?);
    }

    if args.once {
        let mut failed = 0;
        for poller in &mut pollers {
            if !poller.scrape().await {
                failed += 1;
            }
        }
        print!("{}", registry.render());

        if failed > 0 {
            anyhow::bail!("{} of {} node(s) failed to scrape", failed, pollers.len());
        }
        return Ok(());
    }

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for poller in pollers {
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    tasks.push(tokio::spawn(run_cleanup(
        registry.clone(),
        config.aggregation.cleanup_interval(),
        shutdown_rx.clone(),
    )));

    let http_server = HttpServer::new(
        registry.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    }));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;

    let stats = registry.stats();
    info!(
        gauges = stats.gauges,
        series = stats.series,
        samples_set = stats.samples_set,
        series_dropped = stats.series_dropped,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolves on SIGTERM; never resolves where that signal does not exist.
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                return;
            }
            Err(e) => warn!("Couldn't install SIGTERM handler: {}", e),
        }
    }
    std::future::pending::<()>().await;
}
