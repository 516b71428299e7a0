//! Network listeners for the relay daemon.
//!
//! A listener binds a socket, slices whatever arrives into discrete
//! messages, and hands each message to the routing fabric through a
//! bounded channel. Payloads are opaque bytes end to end; no listener
//! inspects or rewrites them.
//!
//! # Design
//!
//! - Listener types self-describe through [`ListenerRegistry`]; the
//!   daemon instantiates by type name from configuration.
//! - Each instance owns the sending half of its output channel and
//!   surrenders the receiving half once via [`Listener::take_output`].
//! - [`Listener::listen`] consumes the boxed instance and runs until
//!   the cancellation token fires or the socket dies.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use crossfire::AsyncRx;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use relay_config::Options;

mod common;
pub mod tcp;
pub mod udp;

pub use common::{ListenerParams, DEFAULT_MAX_MSG_SIZE, DEFAULT_READ_BUFFER};

/// Default depth of the listener -> fabric channel.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// A message source feeding the routing fabric.
///
/// Implementations are configured once, queried for their output
/// channel, then consumed by [`listen`](Listener::listen).
#[async_trait]
pub trait Listener: Send {
    /// Instance name from configuration (e.g. `"udp4"`).
    fn name(&self) -> &str;

    /// Listener type name (e.g. `"UDP"`).
    fn kind(&self) -> &'static str;

    /// Apply instance options. Unknown keys are ignored; recognized
    /// keys override defaults.
    fn configure(&mut self, options: &Options);

    /// Surrender the receiving half of the output channel.
    ///
    /// Returns `Some` exactly once; subsequent calls return `None`.
    fn take_output(&mut self) -> Option<AsyncRx<Bytes>>;

    /// Bind the socket and relay messages until cancelled.
    async fn listen(self: Box<Self>, cancel: CancellationToken);
}

/// Everything a listener constructor receives from the registry.
pub struct ListenerContext {
    /// Instance name from configuration.
    pub name: String,

    /// Depth of the output channel toward the fabric.
    pub queue_size: usize,

    /// Span all logs from this instance attach to.
    pub span: Span,
}

/// Listener constructor signature stored in the registry.
pub type ListenerCtor = fn(ListenerContext) -> Box<dyn Listener>;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No constructor registered under the requested type name
    #[error("unknown listener type: {0}")]
    UnknownType(String),
}

/// Maps listener type names to constructors.
///
/// Registration is last-writer-wins: registering a type name that is
/// already present replaces the previous constructor.
#[derive(Default)]
pub struct ListenerRegistry {
    ctors: HashMap<String, ListenerCtor>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `type_name`, replacing any
    /// previous registration for that name.
    pub fn register(&mut self, type_name: impl Into<String>, ctor: ListenerCtor) {
        let type_name = type_name.into();
        if self.ctors.insert(type_name.clone(), ctor).is_some() {
            tracing::debug!(type_name = %type_name, "listener type re-registered");
        }
    }

    /// Instantiate a listener of type `kind` named `name`.
    pub fn create(&self, kind: &str, name: &str) -> Result<Box<dyn Listener>, RegistryError> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownType(kind.to_string()))?;

        let span = tracing::info_span!("listener", listener = %name, kind = %kind);
        Ok(ctor(ListenerContext {
            name: name.to_string(),
            queue_size: DEFAULT_QUEUE_SIZE,
            span,
        }))
    }

    /// Registered type names, for diagnostics
    pub fn type_names(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }
}

/// Register the built-in listener types (`UDP`, `TCP`).
pub fn register_builtin(registry: &mut ListenerRegistry) {
    registry.register("UDP", udp::UdpListener::create);
    registry.register("TCP", tcp::TcpListener::create);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_are_registered() {
        let mut registry = ListenerRegistry::new();
        register_builtin(&mut registry);

        let mut names = registry.type_names();
        names.sort_unstable();
        assert_eq!(names, vec!["TCP", "UDP"]);
    }

    #[test]
    fn create_known_type() {
        let mut registry = ListenerRegistry::new();
        register_builtin(&mut registry);

        let mut listener = registry.create("UDP", "udp0").unwrap();
        assert_eq!(listener.name(), "udp0");
        assert_eq!(listener.kind(), "UDP");
        assert!(listener.take_output().is_some());
        assert!(listener.take_output().is_none());
    }

    #[test]
    fn create_unknown_type_errors() {
        let registry = ListenerRegistry::new();
        let err = registry.create("SCTP", "x").err().unwrap();
        assert!(matches!(err, RegistryError::UnknownType(ref t) if t == "SCTP"));
    }

    #[test]
    fn later_registration_wins() {
        fn other(ctx: ListenerContext) -> Box<dyn Listener> {
            tcp::TcpListener::create(ctx)
        }

        let mut registry = ListenerRegistry::new();
        registry.register("UDP", udp::UdpListener::create);
        registry.register("UDP", other);

        let listener = registry.create("UDP", "u").unwrap();
        assert_eq!(listener.kind(), "TCP");
    }
}
