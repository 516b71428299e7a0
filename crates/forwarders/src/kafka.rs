//! Kafka forwarder
//!
//! Messages arrive as `<topic>:<payload>`: everything before the first
//! `:` names the topic, everything after is the payload, with no
//! escaping. A message with no `:` at all becomes a topic with an
//! empty payload. Topic names are not validated beyond being UTF-8.
//!
//! Delivery retries belong to the client library; a message the
//! producer refuses to accept is logged and counted as dropped, never
//! requeued here.

use std::time::Duration;

use bytes::Bytes;
use crossfire::MAsyncTx;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};

use relay_config::Options;
use relay_metrics::ForwarderMetricsHandle;

use crate::base::{EmitSink, ForwarderCore, RelayHandle};
use crate::{Forwarder, ForwarderContext};

/// Default producer acknowledgment timeout (ms)
const DEFAULT_ACK_TIMEOUT_MS: i64 = 1000;

/// Default flush threshold (messages)
const DEFAULT_BATCH_N: i64 = 100;

/// Default flush interval (seconds)
const DEFAULT_BATCH_T_SECS: i64 = 5;

/// Default send retries inside the client
const DEFAULT_RETRIES: i64 = 5;

/// Default retry backoff (ms)
const DEFAULT_STAGGER_MS: i64 = 1000;

/// Default close/flush timeout (ms)
const DEFAULT_CLOSE_TIMEOUT_MS: i64 = 10_000;

/// Split a message into topic and payload at the first `:`.
///
/// No delimiter means the whole message is the topic and the payload
/// is empty. That asymmetry is part of the wire contract.
fn split_topic(msg: &[u8]) -> (&[u8], &[u8]) {
    match msg.iter().position(|&b| b == b':') {
        Some(i) => (&msg[..i], &msg[i + 1..]),
        None => (msg, &[]),
    }
}

/// Translate the `acks` option to the client's acknowledgment mode.
fn acks_value(acks: &str) -> &str {
    match acks {
        "-1" => "all",
        other => other,
    }
}

/// Kafka sink endpoint. Inert when the producer never came up.
struct KafkaSink {
    producer: Option<BaseProducer>,
    close_timeout: Duration,
}

impl KafkaSink {
    fn inert(close_timeout: Duration) -> Self {
        Self {
            producer: None,
            close_timeout,
        }
    }
}

impl EmitSink for KafkaSink {
    fn emit(&self, msg: &[u8]) -> bool {
        let Some(producer) = &self.producer else {
            return false;
        };

        let (topic, payload) = split_topic(msg);
        let topic = match std::str::from_utf8(topic) {
            Ok(topic) => topic,
            Err(_) => {
                tracing::debug!("non-UTF-8 topic, message dropped");
                return false;
            }
        };

        let record = BaseRecord::<(), [u8]>::to(topic).payload(payload);
        match producer.send(record) {
            Ok(()) => {
                producer.poll(Duration::ZERO);
                true
            }
            Err((e, _)) => {
                tracing::debug!(topic = %topic, error = %e, "send failed");
                false
            }
        }
    }
}

impl Drop for KafkaSink {
    fn drop(&mut self) {
        if let Some(producer) = &self.producer {
            if let Err(e) = producer.flush(self.close_timeout) {
                tracing::warn!(error = %e, "flush on close failed");
            }
        }
    }
}

/// Forwarder that publishes topic-prefixed messages to Kafka.
pub struct KafkaForwarder {
    core: ForwarderCore,
    brokers: Option<Vec<String>>,
    acks: Option<String>,
    compression: Option<String>,
    ack_timeout_ms: i64,
    batch_n: i64,
    batch_t_secs: i64,
    close_timeout_ms: i64,
    retries: i64,
    stagger_ms: i64,
}

impl KafkaForwarder {
    /// Registry constructor
    pub fn create(ctx: ForwarderContext) -> Box<dyn Forwarder> {
        Box::new(Self::new(ctx))
    }

    fn new(ctx: ForwarderContext) -> Self {
        Self {
            core: ForwarderCore::new(ctx.name, "Kafka", ctx.span),
            brokers: None,
            acks: None,
            compression: None,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            batch_n: DEFAULT_BATCH_N,
            batch_t_secs: DEFAULT_BATCH_T_SECS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
            stagger_ms: DEFAULT_STAGGER_MS,
        }
    }

    /// Producer settings derived from the instance options.
    fn client_config(&self, brokers: &[String]) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers.join(","));
        config.set("request.timeout.ms", self.ack_timeout_ms.to_string());
        config.set("batch.num.messages", self.batch_n.to_string());
        config.set(
            "queue.buffering.max.ms",
            (self.batch_t_secs * 1000).to_string(),
        );
        config.set("connections.max.idle.ms", self.close_timeout_ms.to_string());
        config.set("message.send.max.retries", self.retries.to_string());
        config.set("retry.backoff.ms", self.stagger_ms.to_string());
        if let Some(acks) = &self.acks {
            config.set("acks", acks_value(acks));
        }
        if let Some(compression) = &self.compression {
            config.set("compression.codec", compression.as_str());
        }
        config
    }
}

impl Forwarder for KafkaForwarder {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn configure(&mut self, options: &Options) {
        self.core.configure(options);

        self.brokers = options.get_as_slice("brokers").filter(|b| !b.is_empty());
        self.acks = options.get_as_str("acks");
        self.compression = options.get_as_str("compression");
        if let Some(n) = options.get_as_int("ack_timeout") {
            self.ack_timeout_ms = n;
        }
        if let Some(n) = options.get_as_int("batch_n") {
            self.batch_n = n;
        }
        if let Some(n) = options.get_as_int("batch_t") {
            self.batch_t_secs = n;
        }
        if let Some(n) = options.get_as_int("close_timeout") {
            self.close_timeout_ms = n;
        }
        if let Some(n) = options.get_as_int("retries") {
            self.retries = n;
        }
        if let Some(n) = options.get_as_int("stagger") {
            self.stagger_ms = n;
        }

        if self.brokers.is_none() {
            let _guard = self.core.span().enter();
            tracing::error!("missing required option \"brokers\", forwarder will be inert");
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
        let close_timeout = Duration::from_millis(self.close_timeout_ms.max(0) as u64);
        let sink = {
            let _guard = self.core.span().enter();
            match &self.brokers {
                Some(brokers) => match self.client_config(brokers).create::<BaseProducer>() {
                    Ok(producer) => {
                        tracing::info!(brokers = %brokers.join(","), "producer created");
                        KafkaSink {
                            producer: Some(producer),
                            close_timeout,
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "producer creation failed, forwarder inert");
                        KafkaSink::inert(close_timeout)
                    }
                },
                None => KafkaSink::inert(close_timeout),
            }
        };
        self.core.run(std::sync::Arc::new(sink))
    }
}

#[cfg(test)]
#[path = "kafka_test.rs"]
mod kafka_test;
