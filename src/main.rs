mod cluster;
mod collector;
mod config;
mod error;
mod export;
mod http;
mod kafka;
mod metrics;
mod test_strategies;

use crate::cluster::ClusterDirectory;
use crate::collector::CollectionScheduler;
use crate::collector::groups::GroupEnumerator;
use crate::collector::offset_collector::OffsetCollector;
use crate::config::Config;
use crate::export::prometheus::PrometheusExporter;
use crate::http::server::HttpServer;
use crate::kafka::RdKafkaCluster;
use crate::metrics::registry::MetricsRegistry;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kafka-offset-lag-exporter")]
#[command(about = "Kafka consumer group offset lag exporter")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Debug logging, including librdkafka protocol traces
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    init_logging(level);

    info!("Starting kafka-offset-lag-exporter");

    let config = Config::load(Some(&args.config))?;
    let listen_addr = config.exporter.listen_addr()?;
    info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        protocol = ?config.kafka.protocol,
        group_state = ?config.kafka.group_state,
        poll_interval = ?config.exporter.poll_interval,
        "Configuration loaded"
    );

    let registry = Arc::new(MetricsRegistry::new(config.exporter.enable_current_offset));

    let client = Arc::new(RdKafkaCluster::new(&config.kafka, args.debug)?);
    let directory = match ClusterDirectory::connect(client, config.exporter.max_concurrent_watermarks).await {
        Ok(directory) => Arc::new(directory),
        Err(e) => {
            error!(error = %e, "Could not connect to the cluster");
            return Err(e.into());
        }
    };

    let enumerator = GroupEnumerator::new(config.kafka.compile_group_filter()?);
    let collector = Arc::new(OffsetCollector::new(directory, enumerator, config.kafka.protocol));

    let http_server = HttpServer::bind(
        listen_addr,
        PrometheusExporter::new(Arc::clone(&registry)),
        Arc::clone(&registry),
    )
    .await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler = CollectionScheduler::new(collector, Arc::clone(&registry), &config.exporter);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let shutdown_rx = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!(error = %e, "HTTP server error");
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    let _ = shutdown_tx.send(());

    let _ = server_handle.await;

    // A cycle in flight is not aborted; give it a bounded grace period
    match tokio::time::timeout(Duration::from_secs(10), scheduler_handle).await {
        Ok(_) => info!("Collection loop stopped"),
        Err(_) => error!("Timeout waiting for collection loop to stop"),
    }

    info!("kafka-offset-lag-exporter stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
