use std::net::SocketAddr;

use crate::api::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: request, status.
pub const REQUESTS_TOTAL: &str = "bookd_requests_total";

/// Histogram: request latency in seconds. Labels: request.
pub const REQUEST_DURATION_SECONDS: &str = "bookd_request_duration_seconds";

/// Counter: bookings admitted. Labels: override ("true"/"false").
pub const BOOKINGS_ADMITTED_TOTAL: &str = "bookd_bookings_admitted_total";

/// Counter: admissions soft-rejected with a capacity warning.
pub const CAPACITY_WARNINGS_TOTAL: &str = "bookd_capacity_warnings_total";

/// Counter: block creations rejected over confirmed bookings.
pub const BLOCK_CONFLICTS_TOTAL: &str = "bookd_block_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "bookd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

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

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::CreateStudio { .. } => "create_studio",
        Request::UpdateStudio { .. } => "update_studio",
        Request::AddService { .. } => "add_service",
        Request::UpdateService { .. } => "update_service",
        Request::CreateManualBooking { .. } => "create_manual_booking",
        Request::RequestBooking { .. } => "request_booking",
        Request::SetBookingStatus { .. } => "set_booking_status",
        Request::BlockTime { .. } => "block_time",
        Request::UnblockTime { .. } => "unblock_time",
        Request::GetBlockedTimes { .. } => "get_blocked_times",
        Request::GetBookings { .. } => "get_bookings",
        Request::GetSlotUsage { .. } => "get_slot_usage",
        Request::ListStudios => "list_studios",
    }
}
