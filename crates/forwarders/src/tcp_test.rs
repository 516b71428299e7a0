use std::io::Read;
use std::net::TcpListener;
use std::time::Duration;

use bytes::Bytes;

use crate::tcp::TcpForwarder;
use crate::{Forwarder, ForwarderContext};
use relay_config::Options;

fn make_forwarder(name: &str) -> Box<dyn Forwarder> {
    TcpForwarder::create(ForwarderContext {
        name: name.to_string(),
        span: tracing::info_span!("forwarder", forwarder = %name, kind = "TCP"),
    })
}

#[tokio::test]
async fn relays_bytes_to_the_remote_end() {
    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();

    let receiver = std::thread::spawn(move || {
        let (mut conn, _) = server.accept().unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        // "one\ntwo\nthree\n" is 14 bytes
        while received.len() < 14 {
            match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        received
    });

    let mut forwarder = make_forwarder("tcp-out");
    let mut options = Options::new();
    options.insert("server", "127.0.0.1");
    options.insert("port", port.to_string());
    forwarder.configure(&options);
    forwarder.init_listeners(&["l1".to_string()]);

    let subs = forwarder.subscriptions();
    let metrics = forwarder.metrics_provider();
    let handle = tokio::task::spawn_blocking(move || forwarder.run())
        .await
        .unwrap();

    let (_, tx) = &subs[0];
    for msg in [&b"one\n"[..], b"two\n", b"three\n"] {
        tx.send(Bytes::copy_from_slice(msg)).await.unwrap();
    }

    let received = tokio::task::spawn_blocking(move || receiver.join().unwrap())
        .await
        .unwrap();
    assert_eq!(&received, b"one\ntwo\nthree\n");

    drop(subs);
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .unwrap();
    assert_eq!(metrics.snapshot().msgs_sent, 3);
}

#[tokio::test]
async fn missing_server_option_makes_it_inert() {
    let mut forwarder = make_forwarder("tcp-bad");
    let mut options = Options::new();
    options.insert("port", "19191");
    forwarder.configure(&options);
    forwarder.init_listeners(&["l1".to_string()]);

    let subs = forwarder.subscriptions();
    let metrics = forwarder.metrics_provider();
    let handle = tokio::task::spawn_blocking(move || forwarder.run())
        .await
        .unwrap();

    let (_, tx) = &subs[0];
    for _ in 0..4 {
        tx.send(Bytes::from_static(b"lost")).await.unwrap();
    }

    // shutdown drains whatever was committed, all of it dropped
    drop(subs);
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.msgs_sent, 0);
    assert!(snapshot.msgs_dropped <= 4);
}

#[tokio::test]
async fn failed_connect_makes_it_inert() {
    // A port nothing listens on. Connect fails fast on loopback.
    let closed_port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let mut forwarder = make_forwarder("tcp-down");
    let mut options = Options::new();
    options.insert("server", "127.0.0.1");
    options.insert("port", closed_port.to_string());
    forwarder.configure(&options);
    forwarder.init_listeners(&["l1".to_string()]);

    let metrics = forwarder.metrics_provider();
    let subs = forwarder.subscriptions();
    let handle = tokio::task::spawn_blocking(move || forwarder.run())
        .await
        .unwrap();

    let (_, tx) = &subs[0];
    tx.send(Bytes::from_static(b"nope")).await.unwrap();

    drop(subs);
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .unwrap();
    assert_eq!(metrics.snapshot().msgs_sent, 0);
}
