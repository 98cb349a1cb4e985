use std::net::SocketAddr;
use std::time::Instant;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lab operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "labdesk_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "labdesk_operation_duration_seconds";

/// Counter: operations that changed some state but did not finish. Labels: op.
pub const PARTIAL_FAILURES_TOTAL: &str = "labdesk_partial_failures_total";

/// Counter: rejected allocations. Labels: kind (overlap, insufficient_stock).
pub const CONFLICTS_TOTAL: &str = "labdesk_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: current stock per item. Labels: item.
pub const ITEM_STOCK: &str = "labdesk_item_stock";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labdesk_wal_flush_batch_size";

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

/// Record one finished operation. `status` is "ok" or an error kind label.
pub fn record_operation(op: &'static str, status: &'static str, started: Instant) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_partial_failure(op: &'static str) {
    metrics::counter!(PARTIAL_FAILURES_TOTAL, "op" => op).increment(1);
}

pub fn record_conflict(kind: &'static str) {
    metrics::counter!(CONFLICTS_TOTAL, "kind" => kind).increment(1);
}
