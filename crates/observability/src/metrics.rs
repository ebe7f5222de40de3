//! Hub metrics
//!
//! Recorded through the `metrics` facade; exported when a Prometheus
//! recorder is installed, no-ops otherwise. Bus counters
//! (`hub_envelopes_published_total`, `hub_envelopes_dropped_total`,
//! `hub_handler_failures_total`) are recorded by the bus itself.

use metrics::{counter, gauge, histogram};

/// An interfacer instance was created and started
pub fn record_interfacer_created(kind: &str) {
    counter!("hub_interfacers_created_total", "kind" => kind.to_string()).increment(1);
}

/// An interfacer instance was torn down
pub fn record_interfacer_torn_down(reason: &str) {
    counter!("hub_interfacers_torn_down_total", "reason" => reason.to_string()).increment(1);
}

/// Liveness pass result
pub fn record_interfacers_alive(alive: usize, total: usize) {
    gauge!("hub_interfacers_alive").set(alive as f64);
    gauge!("hub_interfacers_registered").set(total as f64);
}

/// A watchdog heartbeat was sent
pub fn record_heartbeat() {
    counter!("hub_heartbeats_total").increment(1);
}

/// Duration of one reconciliation pass
pub fn record_reconcile_ms(elapsed_ms: f64) {
    histogram!("hub_reconcile_duration_ms").record(elapsed_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder() {
        record_interfacer_created("command");
        record_interfacer_torn_down("removed");
        record_interfacers_alive(1, 2);
        record_heartbeat();
        record_reconcile_ms(0.5);
    }
}
