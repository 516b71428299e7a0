//! Shared forwarder machinery
//!
//! Every forwarder type composes a [`ForwarderCore`]: per-listener
//! buffered lanes, the feeder/drainer thread pair around each ring
//! buffer, and the sent/dropped counters. Sink variants only supply
//! an [`EmitSink`].
//!
//! # Data path
//!
//! ```text
//! fabric --(async tx / blocking rx)--> feeder thread --> RingBuffer
//!                                      RingBuffer --> drainer thread --> EmitSink
//! ```
//!
//! The handoff channel is depth 1: the ring buffer is the real queue,
//! and a full buffer must stall the feeder (and through it the fabric)
//! rather than grow unbounded. Shutdown closes each buffer, which
//! unparks both threads; the drainer still empties committed slots
//! before exiting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossfire::{mpsc, MAsyncTx, Rx};
use tracing::Span;

use relay_buffer::{PopError, PushError, RingBuffer};
use relay_config::Options;
use relay_metrics::{ForwarderMetrics, ForwarderMetricsHandle};

/// Default ring buffer capacity per lane, rounded up to a power of two.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;

/// Default keep-alive interval for connection-oriented sinks.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Fabric handoff channel depth. The ring buffer does the buffering.
const HANDOFF_DEPTH: usize = 1;

/// One sink endpoint. `emit` returns whether the message was handed to
/// the destination; `false` means the message is dropped and counted.
/// An inert sink (missing configuration, failed connection) returns
/// `false` unconditionally.
pub trait EmitSink: Send + Sync + 'static {
    fn emit(&self, msg: &[u8]) -> bool;
}

/// One subscribed listener: fabric-facing sender plus the blocking
/// receiver its feeder thread drains.
struct Lane {
    listener: String,
    tx: MAsyncTx<Bytes>,
    rx: Rx<Bytes>,
}

/// Common state and thread machinery shared by all forwarder types.
pub struct ForwarderCore {
    name: String,
    kind: &'static str,
    span: Span,
    max_buffer_size: usize,
    keep_alive: Duration,
    lanes: Vec<Lane>,
    metrics: Arc<ForwarderMetrics>,
}

impl ForwarderCore {
    pub fn new(name: String, kind: &'static str, span: Span) -> Self {
        Self {
            name,
            kind,
            span,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            lanes: Vec::new(),
            metrics: Arc::new(ForwarderMetrics::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Keep-alive interval for sinks that hold a connection.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn metrics(&self) -> &Arc<ForwarderMetrics> {
        &self.metrics
    }

    pub fn metrics_handle(&self) -> ForwarderMetricsHandle {
        ForwarderMetricsHandle::new(self.name.clone(), self.kind, Arc::clone(&self.metrics))
    }

    /// Apply the options every forwarder understands.
    pub fn configure(&mut self, options: &Options) {
        if let Some(n) = options.get_as_int("max_buffer_size") {
            if n > 0 {
                self.max_buffer_size = n as usize;
            }
        }
        if let Some(secs) = options.get_as_int("keepAliveInterval") {
            if secs > 0 {
                self.keep_alive = Duration::from_secs(secs as u64);
            }
        }
    }

    /// Create one buffered lane per listener.
    pub fn init_listeners(&mut self, listeners: &[String]) {
        let _guard = self.span.enter();
        self.lanes = listeners
            .iter()
            .map(|listener| {
                let (tx, rx) = mpsc::bounded_tx_async_rx_blocking(HANDOFF_DEPTH);
                tracing::debug!(listener = %listener, "subscribed");
                Lane {
                    listener: listener.clone(),
                    tx,
                    rx,
                }
            })
            .collect();
    }

    /// Fabric-facing senders, one per subscribed listener.
    pub fn subscriptions(&self) -> Vec<(String, MAsyncTx<Bytes>)> {
        self.lanes
            .iter()
            .map(|lane| (lane.listener.clone(), lane.tx.clone()))
            .collect()
    }

    /// Start the feeder/drainer pair for every lane.
    ///
    /// Consumes the core; the returned handle closes the buffers and
    /// joins the threads on [`RelayHandle::shutdown`].
    pub fn run(self, sink: Arc<dyn EmitSink>) -> RelayHandle {
        let capacity = self.max_buffer_size.next_power_of_two();
        if capacity != self.max_buffer_size {
            let _guard = self.span.enter();
            tracing::warn!(
                configured = self.max_buffer_size,
                effective = capacity,
                "max_buffer_size rounded up to a power of two"
            );
        }

        let mut buffers = Vec::with_capacity(self.lanes.len());
        let mut threads = Vec::with_capacity(self.lanes.len() * 2);

        for lane in self.lanes {
            let buffer = match RingBuffer::<Bytes>::with_capacity(capacity) {
                Ok(buffer) => Arc::new(buffer),
                Err(e) => {
                    let _guard = self.span.enter();
                    tracing::error!(listener = %lane.listener, error = %e, "lane skipped");
                    continue;
                }
            };
            buffers.push(Arc::clone(&buffer));

            threads.push(spawn_feeder(
                &self.name,
                &lane.listener,
                lane.rx,
                Arc::clone(&buffer),
                self.span.clone(),
            ));
            threads.push(spawn_drainer(
                &self.name,
                &lane.listener,
                buffer,
                Arc::clone(&sink),
                Arc::clone(&self.metrics),
                self.span.clone(),
            ));
        }

        {
            let _guard = self.span.enter();
            tracing::info!(lanes = buffers.len(), capacity = capacity, "forwarder running");
        }

        RelayHandle { buffers, threads }
    }
}

/// Moves messages from the fabric handoff channel into the ring
/// buffer. A closed channel (fabric gone) closes the buffer so the
/// drainer can finish.
fn spawn_feeder(
    name: &str,
    listener: &str,
    rx: Rx<Bytes>,
    buffer: Arc<RingBuffer<Bytes>>,
    span: Span,
) -> JoinHandle<()> {
    let thread_name = format!("{name}-{listener}-feed");
    let listener = listener.to_string();
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let _guard = span.enter();
            loop {
                match rx.recv() {
                    Ok(msg) => match buffer.push(msg) {
                        Ok(()) => {}
                        Err(PushError::Closed(_)) => break,
                    },
                    Err(_) => {
                        tracing::debug!(listener = %listener, "fabric lane closed, closing buffer");
                        buffer.close();
                        break;
                    }
                }
            }
        })
        .expect("spawn feeder thread")
}

/// Drains the ring buffer into the sink, counting every message as
/// sent or dropped. Runs until the buffer is closed and empty.
fn spawn_drainer(
    name: &str,
    listener: &str,
    buffer: Arc<RingBuffer<Bytes>>,
    sink: Arc<dyn EmitSink>,
    metrics: Arc<ForwarderMetrics>,
    span: Span,
) -> JoinHandle<()> {
    let thread_name = format!("{name}-{listener}-drain");
    let listener = listener.to_string();
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let _guard = span.enter();
            loop {
                match buffer.pop() {
                    Ok(msg) => {
                        if sink.emit(&msg) {
                            metrics.record_sent();
                        } else {
                            metrics.record_dropped();
                        }
                    }
                    Err(PopError::Closed) => {
                        tracing::debug!(listener = %listener, "buffer closed and drained");
                        break;
                    }
                }
            }
        })
        .expect("spawn drainer thread")
}

/// Running forwarder: its ring buffers and relay threads.
pub struct RelayHandle {
    buffers: Vec<Arc<RingBuffer<Bytes>>>,
    threads: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Close every buffer and join the relay threads. Committed
    /// messages are still emitted before the drainers exit.
    pub fn shutdown(self) {
        for buffer in &self.buffers {
            buffer.close();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
#[path = "base_test.rs"]
mod base_test;
