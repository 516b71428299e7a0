//! Lock-free ring buffer decoupling a forwarder's ingestion rate from its
//! downstream emission rate.
//!
//! One `RingBuffer` exists per (forwarder, subscribed-listener) pair, with
//! exactly one feeder thread writing and one drainer thread reading. The
//! buffer does not support multiple concurrent writers or readers; that
//! exclusivity is guaranteed by the owner, not enforced here.

mod ring;

pub use ring::{CapacityError, PopError, PushError, RingBuffer};
