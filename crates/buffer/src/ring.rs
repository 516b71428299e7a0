//! Ring buffer core algorithm
//!
//! A fixed-capacity circular queue sequenced by three monotonically
//! increasing atomic counters:
//!
//! - `claim`  - next sequence a writer may take
//! - `commit` - sequences below this are fully written and readable
//! - `read`   - next sequence the reader will take
//!
//! Invariant: `read <= commit <= claim`, and a writer never claims a
//! sequence more than `capacity - 1` ahead of `read`. A slot becomes
//! visible to the reader only once `commit` has advanced past its
//! sequence, so the reader can never observe a partially written slot.
//! Symmetrically, `read` advances only after the slot's contents have
//! been copied out, so a writer admitted at `read + capacity - 1` can
//! never lap a slot the reader is still copying.
//!
//! Waiting sides spin with cooperative yield first, then fall back to a
//! short timed park. Every wait point observes the `closed` flag, so a
//! dead counterpart cannot strand the other side forever.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};

/// Park interval once the spin phase is exhausted.
const PARK_INTERVAL: Duration = Duration::from_micros(100);

/// Requested capacity was not a nonzero power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ring buffer capacity must be a nonzero power of two, got {0}")]
pub struct CapacityError(pub usize);

/// Error returned by [`RingBuffer::push`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError<T> {
    /// The buffer was closed; the rejected value is handed back.
    #[error("ring buffer closed")]
    Closed(T),
}

/// Error returned by [`RingBuffer::pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    /// The buffer was closed and no committed value remained.
    #[error("ring buffer closed")]
    Closed,
}

struct Slot<T>(UnsafeCell<MaybeUninit<T>>);

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot(UnsafeCell::new(MaybeUninit::uninit()))
    }
}

/// Fixed-capacity lock-free single-writer/single-reader circular queue.
///
/// `push` applies backpressure by waiting for the reader when the writer
/// gets a full buffer ahead; `pop` waits for the writer when nothing is
/// committed. Neither wait is an error. Closing the buffer unblocks both
/// sides.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,

    claim: CachePadded<AtomicU64>,
    commit: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,

    closed: AtomicBool,
}

// Safety: message ownership moves through the buffer exactly once. The
// commit/read sequencing guarantees a slot is accessed by at most one
// side at a time, so sharing the structure across the feeder and drainer
// threads is sound as long as T itself can be sent between threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a buffer with the given capacity.
    ///
    /// The capacity must be a nonzero power of two so slot indexing can
    /// use a bitmask instead of a modulo.
    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(CapacityError(capacity));
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            claim: CachePadded::new(AtomicU64::new(0)),
            commit: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Write a value, waiting for the reader if the buffer is full.
    ///
    /// Single-writer protocol: claim a sequence, wait until it is within
    /// `capacity - 1` of `read`, store the payload, then advance `commit`
    /// to publish the slot.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        if self.is_closed() {
            return Err(PushError::Closed(value));
        }

        let seq = self.claim.fetch_add(1, Ordering::Relaxed);

        // Backpressure: wait for the reader to free the slot. `read` can
        // trail `seq` arbitrarily far but never exceeds it (the reader
        // only advances past committed sequences), so saturating math
        // keeps the comparison safe against a racing reader.
        let backoff = Backoff::new();
        while seq.saturating_sub(self.read.load(Ordering::Acquire)) > self.capacity - 1 {
            if self.is_closed() {
                return Err(PushError::Closed(value));
            }
            if backoff.is_completed() {
                thread::park_timeout(PARK_INTERVAL);
            } else {
                backoff.snooze();
            }
        }

        // Safety: the capacity check above guarantees the reader is done
        // with this slot, and the single-writer contract means no other
        // writer touches it.
        unsafe {
            (*self.slots[(seq & self.mask) as usize].0.get()).write(value);
        }

        // Publish: the slot becomes readable only after the payload store.
        let backoff = Backoff::new();
        while self
            .commit
            .compare_exchange(seq, seq + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }

        Ok(())
    }

    /// Read the next value, waiting for the writer if nothing is ready.
    ///
    /// Single-reader protocol: wait for `commit` to pass the current
    /// `read`, copy the slot out, then advance `read` to release the
    /// slot back to the writer.
    pub fn pop(&self) -> Result<T, PopError> {
        // The single-reader contract means nobody else advances `read`,
        // so a plain load is enough to take the next sequence.
        let seq = self.read.load(Ordering::Relaxed);

        let backoff = Backoff::new();
        loop {
            // Committed data is drained even after close; the commit check
            // comes first so a racing close never drops a published slot.
            if self.commit.load(Ordering::Acquire) > seq {
                break;
            }
            if self.is_closed() {
                return Err(PopError::Closed);
            }
            if backoff.is_completed() {
                thread::park_timeout(PARK_INTERVAL);
            } else {
                backoff.snooze();
            }
        }

        // Safety: commit has advanced past this sequence, so the slot
        // holds an initialized value, and the single-reader contract
        // means nobody else takes it.
        let value = unsafe {
            (*self.slots[(seq & self.mask) as usize].0.get())
                .assume_init_read()
        };

        // Release the slot only after the copy; this pairs with the
        // writer's Acquire load of `read` so the writer can never store
        // into a slot while the copy above is still in progress.
        self.read.store(seq + 1, Ordering::Release);
        Ok(value)
    }

    /// Close the buffer, unblocking any waiting reader or writer.
    ///
    /// Committed values already in flight can still be drained by `pop`;
    /// further `push` calls are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the buffer has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Slot capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Approximate number of committed-but-unread values.
    #[inline]
    pub fn len(&self) -> usize {
        let commit = self.commit.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        commit.saturating_sub(read) as usize
    }

    /// Whether no committed values are waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Committed-but-unread values still own their payloads.
        let read = *self.read.get_mut();
        let commit = *self.commit.get_mut();
        for seq in read..commit {
            unsafe {
                (*self.slots[(seq & self.mask) as usize].0.get()).assume_init_drop();
            }
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("claim", &self.claim.load(Ordering::Relaxed))
            .field("commit", &self.commit.load(Ordering::Relaxed))
            .field("read", &self.read.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod ring_test;
