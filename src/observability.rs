use std::net::SocketAddr;

// ── Connections ─────────────────────────────────────────────────

/// Gauge: sessions currently holding a pool slot.
pub const CONNECTIONS_ACTIVE: &str = "lido_connections_active";

/// Counter: total connections accepted into the pool.
pub const CONNECTIONS_TOTAL: &str = "lido_connections_total";

/// Counter: connections turned away with `serverfull`.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "lido_connections_rejected_total";

// ── Requests ────────────────────────────────────────────────────

/// Counter: commands handled. Labels: command.
pub const COMMANDS_TOTAL: &str = "lido_commands_total";

/// Counter: reservations committed.
pub const BOOKINGS_TOTAL: &str = "lido_bookings_total";

/// Counter: provisional claims refused because another user holds them.
pub const CLAIMS_DENIED_TOTAL: &str = "lido_claims_denied_total";

// ── Persistence ─────────────────────────────────────────────────

/// Counter: database flushes. Labels: trigger (command, autosave, shutdown).
pub const SAVES_TOTAL: &str = "lido_saves_total";

/// Histogram: flush duration in seconds.
pub const SAVE_DURATION_SECONDS: &str = "lido_save_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
