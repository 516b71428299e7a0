//! Relay metrics
//!
//! Per-forwarder atomic counters, the provider trait the internal server
//! collects from, process runtime gauges, and the HTTP endpoint serving
//! the merged document.

mod internal;
mod runtime;
mod server;

pub use internal::{
    ForwarderMetrics, ForwarderMetricsHandle, ForwarderMetricsProvider,
    ForwarderMetricsSnapshot, InternalMetrics,
};
pub use runtime::runtime_metrics;
pub use server::{InternalServer, MetricsResponse, ServerError};
