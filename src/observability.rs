use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "carpark_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "carpark_http_request_duration_seconds";

/// Counter: reservation attempts. Labels: status (`ok` or the rejection kind).
pub const RESERVATIONS_TOTAL: &str = "carpark_reservations_total";

/// Counter: reservations removed by a cancel or a leave. Labels: cause.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "carpark_reservations_cancelled_total";

/// Counter: reservations removed because they ended.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "carpark_reservations_expired_total";

/// Counter: events made durable. Labels: event.
pub const EVENTS_COMMITTED_TOTAL: &str = "carpark_events_committed_total";

/// Counter: customer or provider notices that failed to deliver.
pub const NOTICES_DROPPED_TOTAL: &str = "carpark_notices_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: buildings currently held in memory.
pub const BUILDINGS_ACTIVE: &str = "carpark_buildings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carpark_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carpark_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
