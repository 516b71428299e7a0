//! Process-wide runtime gauges
//!
//! Served alongside the per-forwarder counters so one pull covers both
//! relay health and process health.

use std::time::Instant;

use crate::InternalMetrics;

/// Collect process runtime metrics
///
/// Memory figures come from the OS; on platforms where they are
/// unavailable the gauges are simply omitted.
pub fn runtime_metrics(started_at: Instant) -> InternalMetrics {
    let mut metrics = InternalMetrics::new();

    metrics.counters.insert(
        "uptimeSeconds".into(),
        started_at.elapsed().as_secs_f64(),
    );

    if let Some(usage) = memory_stats::memory_stats() {
        metrics
            .gauges
            .insert("physicalMemoryBytes".into(), usage.physical_mem as f64);
        metrics
            .gauges
            .insert("virtualMemoryBytes".into(), usage.virtual_mem as f64);
    }

    metrics
}
