use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "roombook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "roombook_http_request_duration_seconds";

/// Counter: reservations successfully created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: create/update attempts rejected because the slot was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "roombook_reservation_conflicts_total";

/// Counter: failed login or token verification attempts.
pub const AUTH_FAILURES_TOTAL: &str = "roombook_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: rooms currently defined.
pub const ROOMS_ACTIVE: &str = "roombook_rooms_active";

/// Gauge: registered users.
pub const USERS_ACTIVE: &str = "roombook_users_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
