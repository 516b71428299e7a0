//! Internal metrics HTTP server
//!
//! Serves a point-in-time JSON document on a configurable path and port:
//!
//! ```json
//! {
//!   "runtime": { "counters": { "uptimeSeconds": 12.3 }, "gauges": { ... } },
//!   "forwarders": {
//!     "tcp_out": { "counters": { "totalEmissions": 42.0, ... }, "gauges": {} }
//!   }
//! }
//! ```
//!
//! Counters are read without coordination, so the document is a monitoring
//! view, not an audit trail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use relay_config::InternalServerConfig;
use tokio_util::sync::CancellationToken;

use crate::{runtime_metrics, ForwarderMetricsProvider, InternalMetrics};

/// Errors from the internal metrics server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listen socket
    #[error("failed to bind internal server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("internal server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// The JSON document served on the metrics path
#[derive(Debug, serde::Serialize)]
pub struct MetricsResponse {
    /// Process-wide runtime counters and gauges
    pub runtime: InternalMetrics,

    /// Per-forwarder counters and gauges, keyed by instance name
    pub forwarders: BTreeMap<String, InternalMetrics>,
}

struct ServerState {
    providers: Vec<Arc<dyn ForwarderMetricsProvider>>,
    started_at: Instant,
}

/// Pull-based metrics endpoint over the registered forwarder providers
pub struct InternalServer {
    port: u16,
    path: String,
    state: Arc<ServerState>,
}

impl InternalServer {
    /// Create a server over the given providers
    pub fn new(
        config: &InternalServerConfig,
        providers: Vec<Arc<dyn ForwarderMetricsProvider>>,
    ) -> Self {
        Self {
            port: config.port,
            path: config.path.clone(),
            state: Arc::new(ServerState {
                providers,
                started_at: Instant::now(),
            }),
        }
    }

    /// Build the current response document
    pub fn collect(&self) -> MetricsResponse {
        build_response(&self.state)
    }

    /// Bind and serve until the token is cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let app = Router::new()
            .route(&self.path, get(metrics_handler))
            .with_state(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| ServerError::Bind {
                port: self.port,
                source: e,
            })?;

        // Report the bound port; it differs from the configured one when
        // port 0 was requested.
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            path = %self.path,
            "internal metrics server listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;

        tracing::info!("internal metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Json<MetricsResponse> {
    Json(build_response(&state))
}

fn build_response(state: &ServerState) -> MetricsResponse {
    let forwarders = state
        .providers
        .iter()
        .map(|p| (p.forwarder_id().to_string(), p.internal_metrics()))
        .collect();

    MetricsResponse {
        runtime: runtime_metrics(state.started_at),
        forwarders,
    }
}
