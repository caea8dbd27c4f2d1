use std::net::SocketAddr;

use crate::trigger::TriggerAction;

// ── RED metrics (trigger-driven) ────────────────────────────────

/// Counter: total triggers handled. Labels: action, status.
pub const TRIGGERS_TOTAL: &str = "slotgen_triggers_total";

/// Histogram: trigger handling latency in seconds. Labels: action.
pub const TRIGGER_DURATION_SECONDS: &str = "slotgen_trigger_duration_seconds";

// ── USE metrics (reconciliation volume) ─────────────────────────

/// Counter: slots materialized by start-rule generation.
pub const SLOTS_GENERATED_TOTAL: &str = "slotgen_slots_generated_total";

/// Counter: slots moved to closed by reconciliation.
pub const SLOTS_CLOSED_TOTAL: &str = "slotgen_slots_closed_total";

/// Counter: slots reopened after their last closure released them.
pub const SLOTS_REOPENED_TOTAL: &str = "slotgen_slots_reopened_total";

/// Counter: slots deleted by start-rule regeneration or removal.
pub const SLOTS_DELETED_TOTAL: &str = "slotgen_slots_deleted_total";

/// Counter: bookings registered (ruled and virtual slots combined).
pub const TEAMS_REGISTERED_TOTAL: &str = "slotgen_teams_registered_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Map a trigger action to a short label for metrics.
pub fn action_label(action: TriggerAction) -> &'static str {
    match action {
        TriggerAction::Create => "create",
        TriggerAction::Update => "update",
        TriggerAction::Delete => "delete",
    }
}
