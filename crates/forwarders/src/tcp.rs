//! TCP forwarder
//!
//! Writes each message verbatim to one long-lived TCP connection.
//! Framing is the producer's business; the forwarder adds nothing and
//! strips nothing.
//!
//! Both `server` and `port` are required. If either is missing, or the
//! initial connect fails, the forwarder runs inert and counts every
//! message as dropped instead of taking the daemon down.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use crossfire::MAsyncTx;
use socket2::{SockRef, TcpKeepalive};

use relay_config::Options;
use relay_metrics::ForwarderMetricsHandle;

use crate::base::{EmitSink, ForwarderCore, RelayHandle};
use crate::{Forwarder, ForwarderContext};

/// TCP sink endpoint. Inert when the connection never came up.
struct TcpSink {
    stream: Option<Mutex<TcpStream>>,
}

impl TcpSink {
    fn connect(server: &str, port: &str, keep_alive: Duration) -> Self {
        let address = format!("{server}:{port}");
        let stream = match TcpStream::connect(&address) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "connect failed, forwarder inert");
                return Self { stream: None };
            }
        };

        let keepalive = TcpKeepalive::new().with_time(keep_alive);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            tracing::warn!(address = %address, error = %e, "failed to enable TCP keepalive");
        }

        tracing::info!(address = %address, "connected");
        Self {
            stream: Some(Mutex::new(stream)),
        }
    }

    fn inert() -> Self {
        Self { stream: None }
    }
}

impl EmitSink for TcpSink {
    fn emit(&self, msg: &[u8]) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        let Ok(mut stream) = stream.lock() else {
            return false;
        };
        match stream.write_all(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "write failed");
                false
            }
        }
    }
}

/// Forwarder that relays raw messages to a remote TCP endpoint.
pub struct TcpForwarder {
    core: ForwarderCore,
    server: Option<String>,
    port: Option<String>,
}

impl TcpForwarder {
    /// Registry constructor
    pub fn create(ctx: ForwarderContext) -> Box<dyn Forwarder> {
        Box::new(Self {
            core: ForwarderCore::new(ctx.name, "TCP", ctx.span),
            server: None,
            port: None,
        })
    }
}

impl Forwarder for TcpForwarder {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn configure(&mut self, options: &Options) {
        self.core.configure(options);
        self.server = options.get_as_str("server");
        self.port = options.get_as_str("port");

        let _guard = self.core.span().enter();
        if self.server.is_none() {
            tracing::error!("missing required option \"server\", forwarder will be inert");
        }
        if self.port.is_none() {
            tracing::error!("missing required option \"port\", forwarder will be inert");
        }
    }

    fn init_listeners(&mut self, listeners: &[String]) {
        self.core.init_listeners(listeners);
    }

    fn subscriptions(&self) -> Vec<(String, MAsyncTx<Bytes>)> {
        self.core.subscriptions()
    }

    fn metrics_provider(&self) -> ForwarderMetricsHandle {
        self.core.metrics_handle()
    }

    fn run(self: Box<Self>) -> RelayHandle {
        let sink = {
            let _guard = self.core.span().enter();
            match (&self.server, &self.port) {
                (Some(server), Some(port)) => {
                    TcpSink::connect(server, port, self.core.keep_alive())
                }
                _ => TcpSink::inert(),
            }
        };
        self.core.run(std::sync::Arc::new(sink))
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
