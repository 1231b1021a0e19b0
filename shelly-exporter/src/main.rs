//! Prometheus exporter for Shelly devices.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use shelly_exporter::cli::Args;
use shelly_exporter::{
    Aggregator, DeviceRegistry, HttpDeviceClient, HttpServer, MetricsStore, ProbeExecutor,
    TargetResolver, backend_from_config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    shelly_common::init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        static_targets = config.static_targets.len(),
        "Starting Shelly exporter"
    );

    let registry = Arc::new(DeviceRegistry::builtin());
    info!(
        device_types = registry.device_types().count(),
        "Registered device extractors"
    );

    let resolver = Arc::new(TargetResolver::from_config(&config)?);
    let client = Arc::new(HttpDeviceClient::new()?);

    let backend = backend_from_config(&config)?;
    let store = Arc::new(MetricsStore::open(backend).await);

    let executor = ProbeExecutor::new(client, registry, resolver, store.clone());
    let aggregator = Arc::new(Aggregator::new(executor));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        aggregator.clone(),
        config.listen_addr()?,
        config.prefix.clone(),
    );
    let mut http_task = tokio::spawn(async move { http_server.run(shutdown_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut http_task => {
            // Server ended on its own, most likely a bind failure
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("HTTP server error: {}", e);
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    shutdown_tx.send(true)?;

    if tokio::time::timeout(Duration::from_secs(5), &mut http_task)
        .await
        .is_err()
    {
        warn!("HTTP server did not stop in time");
    }

    let stats = aggregator.stats();
    info!(
        scrapes = stats.scrapes_total,
        store_write_failures = stats.store_write_failures,
        saved_targets = store.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
