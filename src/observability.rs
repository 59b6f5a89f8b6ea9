use std::net::SocketAddr;

use crate::error::CoreError;

// ── Scheduler ───────────────────────────────────────────────────

/// Counter: reservations moved to in-flight. Labels: heat, class.
pub const RESERVATIONS_CLAIMED_TOTAL: &str = "slotbench_reservations_claimed_total";

/// Counter: claim attempts with no matching reservation. Labels: heat, class.
pub const RESERVATIONS_NOT_FOUND_TOTAL: &str = "slotbench_reservations_not_found_total";

/// Counter: reservations committed.
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "slotbench_reservations_committed_total";

/// Counter: in-flight reservations handed back.
pub const RESERVATIONS_ABORTED_TOTAL: &str = "slotbench_reservations_aborted_total";

// ── Pools ───────────────────────────────────────────────────────

/// Counter: items accepted into a pool buffer. Labels: pool.
pub const POOL_PUBLISHED_TOTAL: &str = "slotbench_pool_published_total";

/// Counter: items handed to a subscriber. Labels: pool.
pub const POOL_DELIVERED_TOTAL: &str = "slotbench_pool_delivered_total";

// ── Admission / scenarios ───────────────────────────────────────

/// Gauge: units currently holding admission capacity. Labels: gate.
pub const ADMISSION_IN_FLIGHT: &str = "slotbench_admission_in_flight";

/// Counter: scenario outcomes. Labels: tag.
pub const SCENARIO_TOTAL: &str = "slotbench_scenario_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), CoreError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CoreError::InvalidConfiguration(format!("metrics exporter: {e}")))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
