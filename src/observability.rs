use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "roombook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings committed through the desk (single and series).
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: candidates refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roombook_bookings_rejected_total";

/// Counter: series dates by outcome. Labels: outcome (booked, conflict, past, weekend).
pub const SERIES_OCCURRENCES_TOTAL: &str = "roombook_series_occurrences_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::SelectUsers => "select_users",
        Command::InsertRoom { .. } => "insert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms => "select_rooms",
        Command::SelectBookableRooms => "select_bookable_rooms",
        Command::InsertBookings { bookings } if bookings.len() == 1 => "insert_booking",
        Command::InsertBookings { .. } => "batch_insert_bookings",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertSeries { .. } => "insert_series",
        Command::DeleteSeries { .. } => "delete_series",
        Command::SelectSeries { .. } => "select_series",
        Command::SelectAvailability { .. } => "select_availability",
        Command::CheckBooking { .. } => "check_booking",
        Command::PickSlot { .. } => "pick_slot",
    }
}
