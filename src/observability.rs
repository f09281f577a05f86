use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "salon_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "salon_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "salon_booking_conflicts_total";

/// Counter: confirmation side effects that failed. Labels: collaborator.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "salon_side_effect_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "salon_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "salon_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salon_connections_rejected_total";

/// Gauge: number of loaded salons.
pub const TENANTS_ACTIVE: &str = "salon_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salon_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salon_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertServiceType(_) => "insert_service_type",
        Command::InsertProfessional(_) => "insert_professional",
        Command::UpdateProfessional { .. } => "update_professional",
        Command::InsertService(_) => "insert_service",
        Command::UpdateService { .. } => "update_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertClient(_) => "insert_client",
        Command::InsertWalkIn(_) => "insert_walk_in",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots => "select_slots",
        Command::SelectAppointments(_) => "select_appointments",
        Command::SelectServiceTypes => "select_service_types",
        Command::SelectServices { .. } => "select_services",
        Command::SelectProfessionals { .. } => "select_professionals",
        Command::SelectClients { .. } => "select_clients",
    }
}
