use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use meshmini::config::Config;
use meshmini::gateway::Gateway;
use meshmini::store::Storage;
use meshmini::transport::{SerialTransport, Transport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting {} on {}", config.name, config.device);

    let storage = Storage::open(&config.db)
        .map_err(|e| anyhow::anyhow!("failed to open store at {}: {e}", config.db))?;

    let transport = SerialTransport::open(&config.device, Duration::from_secs_f64(config.tx_gap))
        .map_err(|e| anyhow::anyhow!("failed to open link adapter {}: {e}", config.device))?;
    let transport: Box<dyn Transport> = Box::new(transport);

    let now = now_unix();
    let gateway = Gateway::new(storage, transport, config, now);
    let shutdown = gateway.shutdown_flag();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {e}");
            return;
        }
        info!("shutdown signal received");
        shutdown.store(true, Ordering::Relaxed);
    });

    gateway.run().await;
    info!("shut down cleanly");
    Ok(())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
