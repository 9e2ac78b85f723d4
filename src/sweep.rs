use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, local_now};

/// One full maintenance pass: expire past and elapsed slots, retire stale
/// inventory, auto-complete long-elapsed confirmed bookings. Every step is
/// idempotent, so overlapping passes are harmless.
pub async fn sweep_once(engine: &Engine) {
    let cfg = engine.config().snapshot();
    let now = local_now(cfg.timezone);
    let start = std::time::Instant::now();

    let past = engine
        .mark_past_slots_inactive(now.date())
        .await
        .unwrap_or_else(|e| {
            warn!("sweep: past slots pass failed: {e}");
            0
        });
    let elapsed = engine
        .mark_elapsed_today_slots_inactive(now.date(), now.time())
        .await
        .unwrap_or_else(|e| {
            warn!("sweep: elapsed slots pass failed: {e}");
            0
        });
    let stale = engine
        .cleanup_old_slots(cfg.slot_retention_weeks, now.date())
        .await
        .unwrap_or_else(|e| {
            warn!("sweep: stale slots pass failed: {e}");
            0
        });
    let completed = engine.auto_complete_elapsed(now).await.unwrap_or_else(|e| {
        warn!("sweep: auto-complete pass failed: {e}");
        0
    });

    metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());
    if past + elapsed + stale + completed > 0 {
        info!(past, elapsed, stale, completed, "sweep pass");
    }
}

/// Background task running the sweeper on a fixed period.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, period: Duration, threshold: u64) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
