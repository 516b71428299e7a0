//! Message forwarders for the relay daemon.
//!
//! A forwarder drains messages from the routing fabric and emits them
//! to one sink: a remote TCP or UDP endpoint, or a Kafka-style broker.
//! Between the fabric and the sink sits one lock-free ring buffer per
//! subscribed listener, so a slow sink backs pressure up through the
//! fabric instead of losing data silently.
//!
//! # Design
//!
//! - Forwarder types self-describe through [`ForwarderRegistry`]; the
//!   daemon instantiates by type name from configuration.
//! - Sink specifics live behind [`EmitSink`]; the feeder/drainer
//!   thread machinery is shared by composition in [`ForwarderCore`].
//! - Misconfiguration or a failed connection never aborts the daemon:
//!   the forwarder goes *inert*, accepting and counting every message
//!   as dropped. The metrics endpoint makes the failure visible.

use std::collections::HashMap;

use bytes::Bytes;
use crossfire::MAsyncTx;
use tracing::Span;

use relay_config::Options;
use relay_metrics::ForwarderMetricsHandle;

mod base;
pub mod kafka;
pub mod tcp;
pub mod udp;

pub use base::{
    EmitSink, ForwarderCore, RelayHandle, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_BUFFER_SIZE,
};

/// A message sink fed by the routing fabric.
///
/// Lifecycle: construct via the registry, [`configure`](Forwarder::configure),
/// [`init_listeners`](Forwarder::init_listeners), hand the
/// [`subscriptions`](Forwarder::subscriptions) to the fabric, then
/// [`run`](Forwarder::run) consumes the instance and returns a
/// [`RelayHandle`] for shutdown.
pub trait Forwarder: Send {
    /// Instance name from configuration (e.g. `"kafka-main"`).
    fn name(&self) -> &str;

    /// Forwarder type name (e.g. `"Kafka"`).
    fn kind(&self) -> &'static str;

    /// Apply instance options. Unknown keys are ignored; a missing
    /// required key is logged and makes the forwarder inert.
    fn configure(&mut self, options: &Options);

    /// Subscribe to every named listener, one buffered lane each.
    fn init_listeners(&mut self, listeners: &[String]);

    /// Sending halves the fabric should deliver into, one per
    /// subscribed listener.
    fn subscriptions(&self) -> Vec<(String, MAsyncTx<Bytes>)>;

    /// Metrics handle, valid for the lifetime of the process.
    fn metrics_provider(&self) -> ForwarderMetricsHandle;

    /// Connect the sink and start the relay threads.
    fn run(self: Box<Self>) -> RelayHandle;
}

/// Everything a forwarder constructor receives from the registry.
pub struct ForwarderContext {
    /// Instance name from configuration.
    pub name: String,

    /// Span all logs from this instance attach to.
    pub span: Span,
}

/// Forwarder constructor signature stored in the registry.
pub type ForwarderCtor = fn(ForwarderContext) -> Box<dyn Forwarder>;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No constructor registered under the requested type name
    #[error("unknown forwarder type: {0}")]
    UnknownType(String),
}

/// Maps forwarder type names to constructors.
///
/// Registration is last-writer-wins, same as the listener registry.
#[derive(Default)]
pub struct ForwarderRegistry {
    ctors: HashMap<String, ForwarderCtor>,
}

impl ForwarderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `type_name`, replacing any
    /// previous registration for that name.
    pub fn register(&mut self, type_name: impl Into<String>, ctor: ForwarderCtor) {
        let type_name = type_name.into();
        if self.ctors.insert(type_name.clone(), ctor).is_some() {
            tracing::debug!(type_name = %type_name, "forwarder type re-registered");
        }
    }

    /// Instantiate a forwarder of type `kind` named `name`.
    pub fn create(&self, kind: &str, name: &str) -> Result<Box<dyn Forwarder>, RegistryError> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownType(kind.to_string()))?;

        let span = tracing::info_span!("forwarder", forwarder = %name, kind = %kind);
        Ok(ctor(ForwarderContext {
            name: name.to_string(),
            span,
        }))
    }

    /// Registered type names, for diagnostics
    pub fn type_names(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }
}

/// Register the built-in forwarder types (`TCP`, `UDP`, `Kafka`).
pub fn register_builtin(registry: &mut ForwarderRegistry) {
    registry.register("TCP", tcp::TcpForwarder::create);
    registry.register("UDP", udp::UdpForwarder::create);
    registry.register("Kafka", kafka::KafkaForwarder::create);
}
