//! TCP listener
//!
//! Streams carry no natural message boundary, so the wire protocol is
//! newline framing: each accepted connection is read line by line and
//! every line, including its trailing `\n`, becomes one message. Lines
//! longer than `maxMsgSize` are dropped whole.
//!
//! # Design
//!
//! The accept loop runs in the listener task; each accepted connection
//! gets its own reader task so a stalled or misbehaving peer only
//! stalls itself. A connection error tears down that one reader, never
//! the accept loop.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use crossfire::{mpsc, AsyncRx, MAsyncTx};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use relay_config::Options;

use crate::common::ListenerParams;
use crate::{Listener, ListenerContext};

/// Default TCP listen port
const DEFAULT_PORT: &str = "19191";

/// Accept backlog
const LISTEN_BACKLOG: i32 = 1024;

/// TCP keepalive probe interval for accepted connections
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// TCP listener errors
#[derive(Debug, thiserror::Error)]
pub enum TcpListenerError {
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

/// Newline-framed TCP listener
pub struct TcpListener {
    name: String,
    span: tracing::Span,
    params: ListenerParams,
    port: String,
    tx: MAsyncTx<Bytes>,
    rx: Option<AsyncRx<Bytes>>,
}

impl TcpListener {
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

    fn bind_socket(&self) -> Result<TokioTcpListener, TcpListenerError> {
        let address = format!("0.0.0.0:{}", self.port);
        let addr: SocketAddr = address.parse().map_err(|_| TcpListenerError::Address {
            address: address.clone(),
        })?;

        let bind = |e| TcpListenerError::Bind {
            address: address.clone(),
            source: e,
        };

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind)?;
        socket.set_reuse_address(true).map_err(bind)?;
        socket.bind(&addr.into()).map_err(bind)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind)?;
        socket.set_nonblocking(true).map_err(bind)?;

        let std_listener: std::net::TcpListener = socket.into();
        TokioTcpListener::from_std(std_listener).map_err(bind)
    }

    /// Per-socket tuning applied to each accepted connection.
    fn tune_connection(&self, stream: &TcpStream, peer: SocketAddr) {
        let sock = socket2::SockRef::from(stream);
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
        if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
            tracing::debug!(peer = %peer, error = %e, "failed to enable TCP keepalive");
        }
        if let Err(e) = sock.set_recv_buffer_size(self.params.read_buffer) {
            tracing::debug!(peer = %peer, error = %e, "failed to set TCP SO_RCVBUF");
        }
    }

    async fn accept_loop(self, listener: TokioTcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("TCP listener stopping");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "connection accepted");
                            self.tune_connection(&stream, peer);

                            let tx = self.tx.clone();
                            let max_msg_size = self.params.max_msg_size;
                            let conn_cancel = cancel.clone();
                            let span = tracing::Span::current();
                            tokio::spawn(
                                read_connection(stream, peer, tx, max_msg_size, conn_cancel)
                                    .instrument(span),
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Outcome of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A complete line within bounds; `line` holds it.
    Line,
    /// The line exceeded the size cap and was discarded up to its
    /// newline without ever being buffered whole.
    Oversized,
    /// End of stream with nothing buffered.
    Eof,
}

/// Read one newline-terminated line of at most `max` bytes into `line`.
///
/// Accumulation is capped: once a line grows past `max` the buffered
/// prefix is released and the rest is consumed and thrown away chunk by
/// chunk, so a peer streaming an endless unterminated line costs one
/// buffered chunk, never unbounded memory. A partial line at EOF is
/// delivered as-is.
async fn read_bounded_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<LineRead> {
    line.clear();
    let mut discarding = false;

    loop {
        let (consumed, done) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                let outcome = if discarding {
                    LineRead::Oversized
                } else if line.is_empty() {
                    LineRead::Eof
                } else {
                    LineRead::Line
                };
                (0, Some(outcome))
            } else if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                if discarding || line.len() + pos + 1 > max {
                    (pos + 1, Some(LineRead::Oversized))
                } else {
                    line.extend_from_slice(&buf[..=pos]);
                    (pos + 1, Some(LineRead::Line))
                }
            } else if !discarding && line.len() + buf.len() > max {
                discarding = true;
                line.clear();
                (buf.len(), None)
            } else {
                if !discarding {
                    line.extend_from_slice(buf);
                }
                (buf.len(), None)
            }
        };

        reader.consume(consumed);
        if let Some(outcome) = done {
            return Ok(outcome);
        }
    }
}

/// Read newline-framed messages from one connection until EOF, error,
/// or cancellation. Each message keeps its trailing newline.
async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tx: MAsyncTx<Bytes>,
    max_msg_size: usize,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = read_bounded_line(&mut reader, &mut line, max_msg_size) => read,
        };

        match read {
            Ok(LineRead::Eof) => {
                tracing::debug!(peer = %peer, "connection closed by peer");
                break;
            }
            Ok(LineRead::Line) => {
                let msg = Bytes::copy_from_slice(&line);
                if tx.send(msg).await.is_err() {
                    tracing::debug!(peer = %peer, "fabric channel closed, dropping connection");
                    break;
                }
            }
            Ok(LineRead::Oversized) => {
                tracing::warn!(peer = %peer, max = max_msg_size, "oversized line dropped");
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "connection read failed");
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "TCP"
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
            let listener = match self.bind_socket() {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, "TCP listener failed to start");
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => tracing::info!(address = %addr, "TCP listener started"),
                Err(_) => tracing::info!(port = %self.port, "TCP listener started"),
            }

            self.accept_loop(listener, cancel).await;
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
