//! Mira Daemon - real-time tutoring analysis engine
//!
//! Infers cognitive state per submission, runs risk analysis off the
//! response path, and gates generation calls behind a circuit breaker.

use anyhow::Result;
use mirad::config::EngineConfig;
use mirad::gateway::Gateway;
use mirad::generation::HttpGenerationClient;
use mirad::persistence::{MemoryTraceStore, NoopTraceStore, TraceStore};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Mira Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load();
    config.validate()?;

    let backend = Arc::new(HttpGenerationClient::new(&config.generation));
    let traces: Arc<dyn TraceStore> = match config.persistence.mode.as_str() {
        "none" => Arc::new(NoopTraceStore),
        _ => Arc::new(MemoryTraceStore::new()),
    };
    let gateway = Arc::new(Gateway::new(config, traces, backend));

    if gateway.generation_available().await {
        info!("Generation dependency reachable");
    } else {
        warn!("Generation dependency unreachable, fallbacks will be served");
    }

    // Periodic TTL sweep keeps session memory bounded
    let sweeper = Arc::clone(&gateway);
    tokio::spawn(async move {
        let mut ticker = interval(sweeper.sweep_interval());
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            let removed = sweeper.sweep_sessions().await;
            if removed > 0 {
                info!(removed, "session sweep complete");
            }
        }
    });

    info!("Mira Daemon ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, draining background analysis");
    gateway.drain().await;
    info!("Shutdown complete");

    Ok(())
}
