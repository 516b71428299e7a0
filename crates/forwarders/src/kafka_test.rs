use bytes::Bytes;

use crate::kafka::{acks_value, split_topic, KafkaForwarder};
use crate::{Forwarder, ForwarderContext};
use relay_config::Options;

fn make_forwarder(name: &str) -> Box<dyn Forwarder> {
    KafkaForwarder::create(ForwarderContext {
        name: name.to_string(),
        span: tracing::info_span!("forwarder", forwarder = %name, kind = "Kafka"),
    })
}

#[test]
fn topic_is_everything_before_the_first_colon() {
    let (topic, payload) = split_topic(b"orders:{\"id\":1}");
    assert_eq!(topic, b"orders");
    assert_eq!(payload, b"{\"id\":1}");
}

#[test]
fn colons_in_the_payload_are_not_split() {
    let (topic, payload) = split_topic(b"t:a:b:c");
    assert_eq!(topic, b"t");
    assert_eq!(payload, b"a:b:c");
}

#[test]
fn message_without_colon_becomes_topic_with_empty_payload() {
    let (topic, payload) = split_topic(b"heartbeat");
    assert_eq!(topic, b"heartbeat");
    assert_eq!(payload, b"");
}

#[test]
fn leading_colon_means_empty_topic() {
    let (topic, payload) = split_topic(b":payload-only");
    assert_eq!(topic, b"");
    assert_eq!(payload, b"payload-only");
}

#[test]
fn acks_minus_one_means_all() {
    assert_eq!(acks_value("-1"), "all");
    assert_eq!(acks_value("0"), "0");
    assert_eq!(acks_value("1"), "1");
}

#[test]
fn options_map_onto_producer_settings() {
    let mut forwarder = KafkaForwarder::new(ForwarderContext {
        name: "kafka-main".to_string(),
        span: tracing::info_span!("forwarder", forwarder = "kafka-main", kind = "Kafka"),
    });
    let mut options = Options::new();
    options.insert("brokers", "k1:9092, k2:9092");
    options.insert("acks", "-1");
    options.insert("ack_timeout", 2500i64);
    options.insert("batch_n", 200i64);
    options.insert("batch_t", 2i64);
    options.insert("close_timeout", 4000i64);
    options.insert("compression", "gzip");
    options.insert("retries", 3i64);
    options.insert("stagger", 500i64);
    forwarder.configure(&options);

    let config = forwarder.client_config(&["k1:9092".to_string(), "k2:9092".to_string()]);

    assert_eq!(config.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
    assert_eq!(config.get("acks"), Some("all"));
    assert_eq!(config.get("request.timeout.ms"), Some("2500"));
    assert_eq!(config.get("batch.num.messages"), Some("200"));
    assert_eq!(config.get("queue.buffering.max.ms"), Some("2000"));
    assert_eq!(config.get("connections.max.idle.ms"), Some("4000"));
    assert_eq!(config.get("compression.codec"), Some("gzip"));
    assert_eq!(config.get("message.send.max.retries"), Some("3"));
    assert_eq!(config.get("retry.backoff.ms"), Some("500"));
}

#[tokio::test]
async fn missing_brokers_makes_it_inert() {
    let mut forwarder = make_forwarder("kafka-bad");
    forwarder.configure(&Options::new());
    forwarder.init_listeners(&["l1".to_string()]);

    let subs = forwarder.subscriptions();
    let metrics = forwarder.metrics_provider();
    let handle = tokio::task::spawn_blocking(move || forwarder.run())
        .await
        .unwrap();

    let (_, tx) = &subs[0];
    tx.send(Bytes::from_static(b"topic:payload")).await.unwrap();

    drop(subs);
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .unwrap();
    assert_eq!(metrics.snapshot().msgs_sent, 0);
}
