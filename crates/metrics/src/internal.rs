//! Forwarder counters and the metrics provider trait
//!
//! Every forwarder owns one `ForwarderMetrics` instance updated at emit
//! time. Counters are individually atomic; a snapshot is not
//! transactionally consistent as a set, which is acceptable for
//! monitoring but not for auditing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter/gauge pairs published by a component
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InternalMetrics {
    /// Monotonically increasing values
    pub counters: BTreeMap<String, f64>,

    /// Point-in-time values
    pub gauges: BTreeMap<String, f64>,
}

impl InternalMetrics {
    /// Create an empty metrics document
    pub fn new() -> Self {
        Self::default()
    }
}

/// Emission counters for one forwarder
///
/// All fields use atomics for lock-free updates from the drainer threads.
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    /// Total emission attempts
    pub total_emissions: AtomicU64,

    /// Messages accepted by the downstream sink
    pub msgs_sent: AtomicU64,

    /// Messages rejected or discarded
    pub msgs_dropped: AtomicU64,
}

impl ForwarderMetrics {
    /// Create new metrics with all counters at zero
    pub const fn new() -> Self {
        Self {
            total_emissions: AtomicU64::new(0),
            msgs_sent: AtomicU64::new(0),
            msgs_dropped: AtomicU64::new(0),
        }
    }

    /// Record a successful emission
    #[inline]
    pub fn record_sent(&self) {
        self.total_emissions.fetch_add(1, Ordering::Relaxed);
        self.msgs_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or discarded emission
    #[inline]
    pub fn record_dropped(&self) {
        self.total_emissions.fetch_add(1, Ordering::Relaxed);
        self.msgs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> ForwarderMetricsSnapshot {
        ForwarderMetricsSnapshot {
            total_emissions: self.total_emissions.load(Ordering::Relaxed),
            msgs_sent: self.msgs_sent.load(Ordering::Relaxed),
            msgs_dropped: self.msgs_dropped.load(Ordering::Relaxed),
        }
    }

    /// Render the counters in the wire form served by the internal server
    pub fn internal_metrics(&self) -> InternalMetrics {
        let s = self.snapshot();
        let mut metrics = InternalMetrics::new();
        metrics
            .counters
            .insert("totalEmissions".into(), s.total_emissions as f64);
        metrics.counters.insert("msgsSent".into(), s.msgs_sent as f64);
        metrics
            .counters
            .insert("msgsDropped".into(), s.msgs_dropped as f64);
        metrics
    }
}

/// Point-in-time snapshot of forwarder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderMetricsSnapshot {
    pub total_emissions: u64,
    pub msgs_sent: u64,
    pub msgs_dropped: u64,
}

/// Trait for forwarders to expose metrics to the internal server
///
/// Implemented by a cloneable handle so the metrics remain reachable
/// after the forwarder itself has been consumed by `run()`.
pub trait ForwarderMetricsProvider: Send + Sync {
    /// Unique instance name of the forwarder
    fn forwarder_id(&self) -> &str;

    /// Forwarder type ("TCP", "UDP", "Kafka")
    fn forwarder_type(&self) -> &str;

    /// Current counter document
    fn internal_metrics(&self) -> InternalMetrics;
}

/// Handle for accessing a forwarder's metrics
///
/// Holds an `Arc` to the counters, so it stays valid for the lifetime of
/// the process regardless of what happens to the forwarder.
#[derive(Clone)]
pub struct ForwarderMetricsHandle {
    id: String,
    kind: &'static str,
    metrics: Arc<ForwarderMetrics>,
}

impl ForwarderMetricsHandle {
    /// Create a handle over shared counters
    pub fn new(id: impl Into<String>, kind: &'static str, metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            id: id.into(),
            kind,
            metrics,
        }
    }

    /// Snapshot of the underlying counters
    pub fn snapshot(&self) -> ForwarderMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl ForwarderMetricsProvider for ForwarderMetricsHandle {
    fn forwarder_id(&self) -> &str {
        &self.id
    }

    fn forwarder_type(&self) -> &str {
        self.kind
    }

    fn internal_metrics(&self) -> InternalMetrics {
        self.metrics.internal_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_and_dropped_counting() {
        let metrics = ForwarderMetrics::new();

        for _ in 0..3 {
            metrics.record_sent();
        }
        metrics.record_dropped();

        let s = metrics.snapshot();
        assert_eq!(s.msgs_sent, 3);
        assert_eq!(s.msgs_dropped, 1);
        assert_eq!(s.total_emissions, 4);
    }

    #[test]
    fn test_internal_metrics_wire_keys() {
        let metrics = ForwarderMetrics::new();
        metrics.record_sent();
        metrics.record_dropped();

        let doc = metrics.internal_metrics();
        assert_eq!(doc.counters["totalEmissions"], 2.0);
        assert_eq!(doc.counters["msgsSent"], 1.0);
        assert_eq!(doc.counters["msgsDropped"], 1.0);
        assert!(doc.gauges.is_empty());
    }

    #[test]
    fn test_handle_outlives_owner() {
        let metrics = Arc::new(ForwarderMetrics::new());
        let handle = ForwarderMetricsHandle::new("tcp_out", "TCP", Arc::clone(&metrics));

        metrics.record_sent();
        drop(metrics);

        assert_eq!(handle.forwarder_id(), "tcp_out");
        assert_eq!(handle.forwarder_type(), "TCP");
        assert_eq!(handle.snapshot().msgs_sent, 1);
    }
}
