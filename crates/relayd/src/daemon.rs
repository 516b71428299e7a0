//! Daemon assembly and lifecycle.
//!
//! Wiring order matters: forwarders are configured and subscribed
//! before any listener socket opens, so the first message already has
//! a full fan-out to land in. Shutdown reverses it: cancel stops the
//! listeners and routes, the closing fabric lanes drain the forwarder
//! buffers, and only then are the relay threads joined.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use crossfire::AsyncRx;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_config::Config;
use relay_forwarders::{Forwarder, ForwarderRegistry, RelayHandle};
use relay_listeners::{Listener, ListenerRegistry};
use relay_metrics::{ForwarderMetricsProvider, InternalServer, ServerError};
use relay_routing::{Fabric, Route, Subscriber};

/// Run the daemon until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let daemon = Daemon::start(config, cancel.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    cancel.cancel();
    daemon.join().await;
    tracing::info!("relayd stopped");
    Ok(())
}

/// A started daemon: every spawned task and relay handle.
struct Daemon {
    listener_tasks: Vec<JoinHandle<()>>,
    route_tasks: Vec<JoinHandle<()>>,
    server_task: JoinHandle<Result<(), ServerError>>,
    relay_handles: Vec<RelayHandle>,
}

impl Daemon {
    /// Instantiate and wire everything the configuration names.
    ///
    /// A misconfigured instance is logged and skipped; the rest of the
    /// daemon still comes up.
    async fn start(config: Config, cancel: CancellationToken) -> Result<Self> {
        let mut listener_registry = ListenerRegistry::new();
        relay_listeners::register_builtin(&mut listener_registry);
        let mut forwarder_registry = ForwarderRegistry::new();
        relay_forwarders::register_builtin(&mut forwarder_registry);

        let listener_names = config.listener_names();

        // Forwarders first: configure, subscribe, start relay threads.
        let mut subscribers: HashMap<String, Vec<Subscriber>> = HashMap::new();
        let mut providers: Vec<Arc<dyn ForwarderMetricsProvider>> = Vec::new();
        let mut relay_handles = Vec::new();
        for (name, instance) in &config.forwarders {
            let mut forwarder = match forwarder_registry.create(&instance.kind, name) {
                Ok(forwarder) => forwarder,
                Err(e) => {
                    tracing::error!(forwarder = %name, error = %e, "skipping forwarder");
                    continue;
                }
            };
            forwarder.configure(&instance.options);
            forwarder.init_listeners(&listener_names);

            for (listener, tx) in forwarder.subscriptions() {
                subscribers.entry(listener).or_default().push(Subscriber {
                    forwarder: name.clone(),
                    tx,
                });
            }
            providers.push(Arc::new(forwarder.metrics_provider()));

            let handle = tokio::task::spawn_blocking(move || forwarder.run()).await?;
            relay_handles.push(handle);
        }

        // Listeners: configure, wire into the fabric, open sockets.
        let mut fabric = Fabric::new();
        let mut listener_tasks = Vec::new();
        for (name, instance) in &config.listeners {
            let mut listener = match listener_registry.create(&instance.kind, name) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(listener = %name, error = %e, "skipping listener");
                    continue;
                }
            };
            listener.configure(&instance.options);

            let rx: Option<AsyncRx<Bytes>> = listener.take_output();
            if let Some(rx) = rx {
                fabric.add_route(Route {
                    listener: name.clone(),
                    rx,
                    subscribers: subscribers.remove(name).unwrap_or_default(),
                });
            }
            listener_tasks.push(tokio::spawn(listener.listen(cancel.clone())));
        }

        if fabric.is_empty() {
            tracing::warn!("no listeners configured, nothing to relay");
        }
        let route_tasks = fabric.spawn(cancel.clone());

        let server = InternalServer::new(&config.internal_server, providers);
        let server_task = tokio::spawn(server.run(cancel.clone()));

        tracing::info!(
            listeners = listener_tasks.len(),
            forwarders = relay_handles.len(),
            "relayd started"
        );

        Ok(Self {
            listener_tasks,
            route_tasks,
            server_task,
            relay_handles,
        })
    }

    /// Wait for every task to finish and join the relay threads.
    /// Call after cancelling the token passed to `start`.
    async fn join(self) {
        for task in self.listener_tasks {
            let _ = task.await;
        }
        for task in self.route_tasks {
            let _ = task.await;
        }
        match self.server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "metrics server error"),
            Err(e) => tracing::warn!(error = %e, "metrics server task panicked"),
        }

        for handle in self.relay_handles {
            let joined = tokio::task::spawn_blocking(move || handle.shutdown()).await;
            if let Err(e) = joined {
                tracing::warn!(error = %e, "relay thread join failed");
            }
        }
    }
}
