use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "deskbook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "deskbook_command_duration_seconds";

/// Counter: bookings refused because the day was full.
pub const BOOKINGS_REJECTED_TOTAL: &str = "deskbook_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "deskbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "deskbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "deskbook_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "deskbook_tenants_active";

/// Counter: failed hellos.
pub const AUTH_FAILURES_TOTAL: &str = "deskbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "deskbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "deskbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "deskbook_wal_compactions_total";

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

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::ListCities => "list_cities",
        Command::GetCity { .. } => "get_city",
        Command::CreateCity { .. } => "create_city",
        Command::UpdateCity { .. } => "update_city",
        Command::DeleteCity { .. } => "delete_city",
        Command::ListNotices { .. } => "list_notices",
        Command::GetNotice { .. } => "get_notice",
        Command::PostNotice { .. } => "post_notice",
        Command::DeleteNotice { .. } => "delete_notice",
        Command::DayView { .. } => "day_view",
        Command::Calendar { .. } => "calendar",
        Command::MyBookings { .. } => "my_bookings",
        Command::Invite { .. } => "invite",
        Command::Book { .. } => "book",
        Command::Remove { .. } => "remove",
        Command::Me => "me",
        Command::UpdateMe { .. } => "update_me",
        Command::SetFavoriteCity { .. } => "set_favorite_city",
        Command::FindProfile { .. } => "find_profile",
        Command::SearchProfiles { .. } => "search_profiles",
        Command::ListAdmins => "list_admins",
        Command::AdminInfo { .. } => "admin_info",
        Command::GrantAdmin { .. } => "grant_admin",
        Command::UpdateAdmin { .. } => "update_admin",
        Command::RevokeAdmin { .. } => "revoke_admin",
    }
}
