use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use slotwise::config::{ConfigHandle, EngineConfig};
use slotwise::drip::LogDrip;
use slotwise::engine::Engine;
use slotwise::notify::NotifyHub;
use slotwise::sweep;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("SLOTWISE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    slotwise::observability::init(metrics_port);

    let data_dir = std::env::var("SLOTWISE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_secs: u64 = env_or("SLOTWISE_SWEEP_INTERVAL_SECS", 60);
    let compact_secs: u64 = env_or("SLOTWISE_COMPACT_INTERVAL_SECS", 300);
    let compact_threshold: u64 = env_or("SLOTWISE_COMPACT_THRESHOLD", 1000);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("slotwise.wal");

    let config = ConfigHandle::new(EngineConfig::from_env());
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify, Arc::new(LogDrip), config.clone())?);

    let cfg = config.snapshot();
    info!("slotwise maintenance daemon started");
    info!("  data_dir: {data_dir}");
    info!("  timezone: {}", cfg.timezone);
    info!("  business hours: {}–{}", cfg.day_start, cfg.day_end);
    info!("  sweep every {sweep_secs}s, compact every {compact_secs}s (threshold {compact_threshold})");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweep::run_sweeper(
        engine.clone(),
        Duration::from_secs(sweep_secs),
    ));
    let compactor = tokio::spawn(sweep::run_compactor(
        engine.clone(),
        Duration::from_secs(compact_secs),
        compact_threshold,
    ));

    // Graceful shutdown: stop the loops on SIGTERM/ctrl-c, then take one
    // final compaction so the next start replays a minimal journal.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("slotwise stopped");
    Ok(())
}
