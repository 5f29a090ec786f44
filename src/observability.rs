use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotguard_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotguard_query_duration_seconds";

/// Counter: engine rejections. Labels: kind.
pub const ERRORS_TOTAL: &str = "slotguard_errors_total";

// ── Booking outcomes ────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "slotguard_bookings_created_total";

/// Counter: creations rejected because the slot was taken.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "slotguard_scheduling_conflicts_total";

/// Counter: committed status changes. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "slotguard_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "slotguard_connections_active";
pub const CONNECTIONS_TOTAL: &str = "slotguard_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotguard_connections_rejected_total";

/// Gauge: number of loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "slotguard_tenants_active";

/// Counter: sessions refused because the login user is not a ULID.
pub const AUTH_FAILURES_TOTAL: &str = "slotguard_auth_failures_total";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on the RED metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::UpdateStatus { .. } => "update_status",
        Command::UpdateNotes { .. } => "update_notes",
        Command::HideBooking { .. } => "hide_booking",
        Command::SelectReviewCandidates => "select_review_candidates",
        Command::InsertReview { .. } => "insert_review",
        Command::SelectReviews { .. } => "select_reviews",
        Command::SelectEarnings => "select_earnings",
        Command::Listen { .. } => "listen",
    }
}
