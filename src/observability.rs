use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "comunal_bookings_created_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "comunal_bookings_cancelled_total";

/// Counter: bookings completed (sweeper or explicit transition).
pub const BOOKINGS_COMPLETED_TOTAL: &str = "comunal_bookings_completed_total";

/// Counter: create/update attempts rejected by the conflict detector.
pub const BOOKING_CONFLICTS_TOTAL: &str = "comunal_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active sites (loaded engines).
pub const SITES_ACTIVE: &str = "comunal_sites_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "comunal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "comunal_wal_flush_batch_size";

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
