//! Ring buffer tests: FIFO order, commit gating, concurrent stress, and
//! close semantics.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use super::{CapacityError, PopError, PushError, RingBuffer};

#[test]
fn test_capacity_must_be_power_of_two() {
    assert_eq!(
        RingBuffer::<u64>::with_capacity(100).unwrap_err(),
        CapacityError(100)
    );
    assert_eq!(
        RingBuffer::<u64>::with_capacity(0).unwrap_err(),
        CapacityError(0)
    );
    assert!(RingBuffer::<u64>::with_capacity(1).is_ok());
    assert!(RingBuffer::<u64>::with_capacity(128).is_ok());
}

#[test]
fn test_fifo_full_capacity_round_trip() {
    // Filling every slot and reading back returns the messages in write
    // order, byte-identical.
    let capacity = 128;
    let buf = RingBuffer::<Bytes>::with_capacity(capacity).unwrap();

    let messages: Vec<Bytes> = (0..capacity)
        .map(|i| Bytes::from(format!("message-{i:04}")))
        .collect();

    for msg in &messages {
        buf.push(msg.clone()).unwrap();
    }
    assert_eq!(buf.len(), capacity);

    for expected in &messages {
        assert_eq!(&buf.pop().unwrap(), expected);
    }
    assert!(buf.is_empty());
}

#[test]
fn test_reader_blocks_until_commit() {
    // The reader must never observe a slot before it is committed: a pop
    // issued before any push blocks, then yields exactly the pushed value.
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(8).unwrap());

    let reader = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || buf.pop().unwrap())
    };

    // Give the reader time to enter its wait loop.
    thread::sleep(Duration::from_millis(50));
    buf.push(42).unwrap();

    assert_eq!(reader.join().unwrap(), 42);
}

#[test]
fn test_writer_backpressure_then_drain() {
    // Fill the buffer past capacity; the writer must wait (not fail)
    // until the reader frees slots.
    let capacity = 4;
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(capacity).unwrap());

    let writer = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for i in 0..(capacity as u64 * 4) {
                buf.push(i).unwrap();
            }
        })
    };

    thread::sleep(Duration::from_millis(20));
    for i in 0..(capacity as u64 * 4) {
        assert_eq!(buf.pop().unwrap(), i);
    }
    writer.join().unwrap();
}

#[test]
fn test_reader_ahead_of_writer_then_sustained_relay() {
    // A reader that starts waiting before the first push must not wedge
    // the writer; relaying then continues in order well past the first
    // wraparound.
    let capacity = 8;
    const N: u64 = 1_000;
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(capacity).unwrap());

    let reader = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for expected in 0..N {
                assert_eq!(buf.pop().unwrap(), expected);
            }
        })
    };

    // Let the reader enter its wait loop first.
    thread::sleep(Duration::from_millis(50));
    for i in 0..N {
        buf.push(i).unwrap();
    }

    reader.join().unwrap();
    assert!(buf.is_empty());
}

#[test]
fn test_wraparound_preserves_payload_integrity() {
    // A tiny buffer maximizes lap pressure: the writer is always one
    // wrap behind reusing the slot the reader last copied. Heap-backed
    // payloads surface any overwrite of an in-flight slot.
    const N: u64 = 50_000;
    let buf = Arc::new(RingBuffer::<Box<u64>>::with_capacity(2).unwrap());

    let writer = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for i in 0..N {
                buf.push(Box::new(i)).unwrap();
            }
        })
    };

    for expected in 0..N {
        assert_eq!(*buf.pop().unwrap(), expected);
    }
    writer.join().unwrap();
}

#[test]
fn test_concurrent_stress_no_loss_no_duplication() {
    const N: u64 = 100_000;
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(64).unwrap());

    let writer = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for i in 0..N {
                buf.push(i).unwrap();
            }
        })
    };

    let reader = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for expected in 0..N {
                assert_eq!(buf.pop().unwrap(), expected);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert!(buf.is_empty());
}

#[test]
fn test_close_unblocks_waiting_reader() {
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(8).unwrap());

    let reader = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || buf.pop())
    };

    thread::sleep(Duration::from_millis(50));
    buf.close();

    assert_eq!(reader.join().unwrap(), Err(PopError::Closed));
}

#[test]
fn test_close_unblocks_waiting_writer() {
    let capacity = 2;
    let buf = Arc::new(RingBuffer::<u64>::with_capacity(capacity).unwrap());

    // Fill the buffer so the next push has to wait.
    for i in 0..capacity as u64 {
        buf.push(i).unwrap();
    }

    let writer = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || buf.push(99))
    };

    thread::sleep(Duration::from_millis(50));
    buf.close();

    assert_eq!(writer.join().unwrap(), Err(PushError::Closed(99)));
}

#[test]
fn test_committed_values_drain_after_close() {
    let buf = RingBuffer::<u64>::with_capacity(8).unwrap();

    buf.push(1).unwrap();
    buf.push(2).unwrap();
    buf.close();

    assert_eq!(buf.push(3), Err(PushError::Closed(3)));
    assert_eq!(buf.pop(), Ok(1));
    assert_eq!(buf.pop(), Ok(2));
    assert_eq!(buf.pop(), Err(PopError::Closed));
}

#[test]
fn test_in_flight_values_dropped_cleanly() {
    // Drop with committed-but-unread payloads must release them.
    let payload = Arc::new(());
    {
        let buf = RingBuffer::<Arc<()>>::with_capacity(8).unwrap();
        buf.push(Arc::clone(&payload)).unwrap();
        buf.push(Arc::clone(&payload)).unwrap();
    }
    assert_eq!(Arc::strong_count(&payload), 1);
}
