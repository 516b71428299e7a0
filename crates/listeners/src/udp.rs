//! UDP listener
//!
//! Datagram framing is the wire framing: one datagram in, one message
//! out, byte for byte. Datagrams larger than `maxMsgSize` are dropped
//! and counted in the log, never truncated into a corrupt message.
//!
//! # Design
//!
//! A single receive task owns the socket. The kernel receive buffer is
//! sized via `readBuffer` (SO_RCVBUF) so bursts are absorbed before
//! user space; if the fabric channel fills, the receive task awaits
//! and the kernel buffer takes the pressure.

use std::net::SocketAddr;

use bytes::Bytes;
use crossfire::{mpsc, AsyncRx, MAsyncTx};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use relay_config::Options;

use crate::common::ListenerParams;
use crate::{Listener, ListenerContext};

/// Default UDP listen port
const DEFAULT_PORT: &str = "19192";

/// UDP listener errors
#[derive(Debug, thiserror::Error)]
pub enum UdpListenerError {
    /// Bind address did not parse
    #[error("invalid bind address {address}")]
    Address { address: String },

    /// Failed to bind the socket
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Datagram-framed UDP listener
pub struct UdpListener {
    name: String,
    span: tracing::Span,
    params: ListenerParams,
    port: String,
    tx: MAsyncTx<Bytes>,
    rx: Option<AsyncRx<Bytes>>,
}

impl UdpListener {
    /// Registry constructor
    pub fn create(ctx: ListenerContext) -> Box<dyn Listener> {
        let (tx, rx) = mpsc::bounded_async(ctx.queue_size);
        Box::new(Self {
            name: ctx.name,
            span: ctx.span,
            params: ListenerParams::default(),
            port: DEFAULT_PORT.to_string(),
            tx,
            rx: Some(rx),
        })
    }

    /// Bind a nonblocking UDP socket with the requested receive buffer.
    fn bind_socket(&self) -> Result<UdpSocket, UdpListenerError> {
        let address = format!("0.0.0.0:{}", self.port);
        let addr: SocketAddr = address.parse().map_err(|_| UdpListenerError::Address {
            address: address.clone(),
        })?;

        let bind = |e| UdpListenerError::Bind {
            address: address.clone(),
            source: e,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind)?;
        if let Err(e) = socket.set_recv_buffer_size(self.params.read_buffer) {
            tracing::warn!(
                error = %e,
                requested = self.params.read_buffer,
                "failed to set UDP SO_RCVBUF"
            );
        }
        socket.bind(&addr.into()).map_err(bind)?;
        socket.set_nonblocking(true).map_err(bind)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(bind)
    }

    async fn receive_loop(self, socket: UdpSocket, cancel: CancellationToken) {
        let mut recv_buf = vec![0u8; self.params.max_msg_size];

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("UDP listener stopping");
                    break;
                }

                recv_result = socket.recv_from(&mut recv_buf) => {
                    match recv_result {
                        Ok((len, peer)) => {
                            if len >= self.params.max_msg_size {
                                // recv filled the whole buffer: the datagram
                                // was at least max_msg_size and may have been
                                // truncated by the kernel.
                                tracing::warn!(
                                    peer = %peer,
                                    size = len,
                                    max = self.params.max_msg_size,
                                    "oversized datagram dropped"
                                );
                                continue;
                            }

                            let msg = Bytes::copy_from_slice(&recv_buf[..len]);
                            if self.tx.send(msg).await.is_err() {
                                tracing::debug!("fabric channel closed, stopping");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "UDP receive failed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Listener for UdpListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "UDP"
    }

    fn configure(&mut self, options: &Options) {
        self.params.apply(options);
        if let Some(port) = options.get_as_str("port") {
            self.port = port;
        }
    }

    fn take_output(&mut self) -> Option<AsyncRx<Bytes>> {
        self.rx.take()
    }

    async fn listen(self: Box<Self>, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            let socket = match self.bind_socket() {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::error!(error = %e, "UDP listener failed to start");
                    return;
                }
            };

            match socket.local_addr() {
                Ok(addr) => tracing::info!(address = %addr, "UDP listener started"),
                Err(_) => tracing::info!(port = %self.port, "UDP listener started"),
            }

            self.receive_loop(socket, cancel).await;
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "udp_test.rs"]
mod udp_test;
