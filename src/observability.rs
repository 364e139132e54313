use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::Reservation;
use crate::sql::Command;

// ── Booking ─────────────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "caravanshare_reservations_total";

/// Counter: reservations moved to cancelled.
pub const CANCELLATIONS_TOTAL: &str = "caravanshare_cancellations_total";

/// Histogram: time spent inside a caravan's critical section, in seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "caravanshare_admission_duration_seconds";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "caravanshare_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "caravanshare_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "caravanshare_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "caravanshare_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "caravanshare_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "caravanshare_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "caravanshare_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Outcome label for a reservation attempt.
pub fn outcome_label(result: &Result<Reservation, EngineError>) -> &'static str {
    match result {
        Ok(_) => "admitted",
        Err(EngineError::InvalidDateRange { .. }) => "invalid_date_range",
        Err(EngineError::ResourceNotFound(_)) => "resource_not_found",
        Err(EngineError::GuestNotFound(_)) => "guest_not_found",
        Err(EngineError::DateConflict { .. }) => "date_conflict",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(_) => "error",
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource { .. } => "insert_caravan",
        Command::InsertUser { .. } => "insert_user",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectResources { .. } => "select_caravans",
        Command::SelectUsers { .. } => "select_users",
        Command::SelectReservations { .. } => "select_reservations",
    }
}
