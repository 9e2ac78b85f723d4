use std::net::SocketAddr;

// ── Booking traffic ──────────────────────────────────────────────

/// Counter: bookings created. Labels: kind.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotwise_bookings_created_total";

/// Counter: booking status transitions applied. Labels: action.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "slotwise_booking_transitions_total";

/// Counter: booking requests rejected by conflict or eligibility checks.
/// Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "slotwise_booking_rejections_total";

// ── Calendar inventory ───────────────────────────────────────────

/// Counter: slots created by generation runs.
pub const SLOTS_GENERATED_TOTAL: &str = "slotwise_slots_generated_total";

/// Counter: slots expired by the sweeper.
pub const SLOTS_EXPIRED_TOTAL: &str = "slotwise_slots_expired_total";

/// Gauge: enrolled salesmen with an active calendar.
pub const SALESMEN_ACTIVE: &str = "slotwise_salesmen_active";

// ── Engine internals ─────────────────────────────────────────────

/// Histogram: duration of one full sweeper pass in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "slotwise_sweep_duration_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
