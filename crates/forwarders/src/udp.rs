//! UDP forwarder
//!
//! One message, one datagram. The socket is bound to an ephemeral
//! local port and connected, so `send` carries the destination and the
//! kernel rejects unrelated inbound traffic.
//!
//! Both `server` and `port` are required; missing either makes the
//! forwarder inert.

use std::net::UdpSocket;

use bytes::Bytes;
use crossfire::MAsyncTx;

use relay_config::Options;
use relay_metrics::ForwarderMetricsHandle;

use crate::base::{EmitSink, ForwarderCore, RelayHandle};
use crate::{Forwarder, ForwarderContext};

/// UDP sink endpoint. Inert when the socket never came up.
struct UdpSink {
    socket: Option<UdpSocket>,
}

impl UdpSink {
    fn connect(server: &str, port: &str) -> Self {
        let address = format!("{server}:{port}");
        let socket = match UdpSocket::bind("0.0.0.0:0").and_then(|s| {
            s.connect(&address)?;
            Ok(s)
        }) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "socket setup failed, forwarder inert");
                return Self { socket: None };
            }
        };

        tracing::info!(address = %address, "sending");
        Self {
            socket: Some(socket),
        }
    }

    fn inert() -> Self {
        Self { socket: None }
    }
}

impl EmitSink for UdpSink {
    fn emit(&self, msg: &[u8]) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };
        match socket.send(msg) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "send failed");
                false
            }
        }
    }
}

/// Forwarder that relays each message as one UDP datagram.
pub struct UdpForwarder {
    core: ForwarderCore,
    server: Option<String>,
    port: Option<String>,
}

impl UdpForwarder {
    /// Registry constructor
    pub fn create(ctx: ForwarderContext) -> Box<dyn Forwarder> {
        Box::new(Self {
            core: ForwarderCore::new(ctx.name, "UDP", ctx.span),
            server: None,
            port: None,
        })
    }
}

impl Forwarder for UdpForwarder {
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
                (Some(server), Some(port)) => UdpSink::connect(server, port),
                _ => UdpSink::inert(),
            }
        };
        self.core.run(std::sync::Arc::new(sink))
    }
}

#[cfg(test)]
#[path = "udp_test.rs"]
mod udp_test;
