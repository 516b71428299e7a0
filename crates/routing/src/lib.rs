//! Routing fabric
//!
//! One task per listener copies every message to every subscribed
//! forwarder. "Copy" is a reference hand-off: payloads are [`Bytes`],
//! so fan-out never duplicates the bytes themselves.
//!
//! # Backpressure
//!
//! Sends into forwarder lanes are awaited, not dropped. A forwarder
//! whose ring buffer is full stalls its lane, which stalls the route
//! task, which stalls the listener channel. Loss only ever happens at
//! the edges (socket overflow, sink failure), where it is counted.

use bytes::Bytes;
use crossfire::{AsyncRx, MAsyncTx};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// One forwarder lane attached to a route.
pub struct Subscriber {
    /// Forwarder instance name, for logs
    pub forwarder: String,

    /// Sending half of the forwarder's lane for this listener
    pub tx: MAsyncTx<Bytes>,
}

/// One listener's output and everyone who wants it.
pub struct Route {
    /// Listener instance name, for logs
    pub listener: String,

    /// Receiving half of the listener's output channel
    pub rx: AsyncRx<Bytes>,

    /// Forwarder lanes subscribed to this listener
    pub subscribers: Vec<Subscriber>,
}

/// The assembled listener-to-forwarder wiring.
#[derive(Default)]
pub struct Fabric {
    routes: Vec<Route>,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a route. Routes are independent; ordering is only
    /// guaranteed per listener-forwarder pair.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Spawn one fan-out task per route.
    ///
    /// Each task runs until the token is cancelled or its listener
    /// channel closes. Dropping the returned handles does not stop the
    /// tasks; cancel the token and await them.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.routes
            .into_iter()
            .map(|route| {
                let cancel = cancel.clone();
                let span = tracing::info_span!("route", listener = %route.listener);
                tokio::spawn(run_route(route, cancel).instrument(span))
            })
            .collect()
    }
}

async fn run_route(route: Route, cancel: CancellationToken) {
    tracing::debug!(subscribers = route.subscribers.len(), "route started");

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("route cancelled");
                break;
            }
            msg = route.rx.recv() => match msg {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::debug!("listener channel closed");
                    break;
                }
            },
        };

        for subscriber in &route.subscribers {
            // Bytes clone shares the payload; only the handle is copied.
            if subscriber.tx.send(msg.clone()).await.is_err() {
                tracing::debug!(forwarder = %subscriber.forwarder, "lane closed");
            }
        }
    }
}
