// Lock-free single-producer single-consumer ring.
//
// Every inter-thread hand-off in the system goes through one of these:
// order server -> matching engine, engine -> order server, engine -> market
// data publisher, publisher -> snapshot synthesizer, consumer -> trade
// engine, trade engine -> order gateway, and the logger.
//
// The producer obtains a reference to the slot it is about to publish with
// `next_to_write()`, fills it in place, then calls `commit_write()`. The
// consumer mirrors this with `next_to_read()` / `commit_read()`. Publishing
// uses a release store on the index so the payload write is visible before
// the index bump; the peer reads the index with acquire.
//
// Capacity is the system's back-pressure reservoir, not a safety net:
// overflowing through the two-phase API aborts the process. Producers that
// are allowed to shed load (the logger) use `try_push` instead.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Producer-owned index, padded to its own cache line so the consumer's
/// index updates never invalidate it.
#[repr(align(64))]
struct WriteCursor {
    /// Monotonic count of slots published. Only the producer stores to it.
    next: AtomicUsize,
}

/// Consumer-owned index, padded for the same reason.
#[repr(align(64))]
struct ReadCursor {
    /// Monotonic count of slots consumed. Only the consumer stores to it.
    next: AtomicUsize,
}

/// Fixed-capacity SPSC ring of `T`.
///
/// `N` must be a power of two. Exactly one thread may act as producer and
/// exactly one as consumer; a second producer or consumer is undefined
/// behavior, which is why the slot accessors carry documented contracts
/// instead of compile-time enforcement.
pub struct LFQueue<T, const N: usize> {
    /// Slot storage, heap-allocated so large rings never sit on a thread
    /// stack. Pre-constructed so `next_to_write` can hand out `&mut T`
    /// without tracking initialization state.
    slots: UnsafeCell<Box<[T]>>,
    writer: WriteCursor,
    reader: ReadCursor,
    /// Element count, maintained with release increments/decrements. Kept
    /// only for size queries; emptiness and fullness are derived from the
    /// cursors.
    count: AtomicUsize,
}

// SAFETY: ownership of T values is transferred producer -> consumer through
// the ring; the cursor atomics order the payload accesses. Safe to share
// across the two participating threads when T itself can move between them.
unsafe impl<T: Send, const N: usize> Send for LFQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for LFQueue<T, N> {}

impl<T: Default, const N: usize> LFQueue<T, N> {
    /// Creates an empty ring with all slots default-constructed.
    ///
    /// # Panics
    /// Panics if `N` is zero or not a power of two.
    pub fn new() -> Self {
        assert!(N > 0 && N.is_power_of_two(), "ring capacity must be a power of two");

        Self {
            slots: UnsafeCell::new((0..N).map(|_| T::default()).collect()),
            writer: WriteCursor { next: AtomicUsize::new(0) },
            reader: ReadCursor { next: AtomicUsize::new(0) },
            count: AtomicUsize::new(0),
        }
    }
}

impl<T, const N: usize> LFQueue<T, N> {
    const MASK: usize = N - 1;

    /// Returns the slot the producer will publish next, to be filled in
    /// place and then committed with [`commit_write`](Self::commit_write).
    ///
    /// Must only be called from the producer thread, and at most once per
    /// commit. The returned reference is invalidated by `commit_write`.
    ///
    /// # Panics
    /// Panics if the ring is full. The rings are sized as the system's
    /// back-pressure reservoir; hitting this is a deployment defect.
    #[inline]
    pub fn next_to_write(&self) -> &mut T {
        let write = self.writer.next.load(Ordering::Relaxed);
        let read = self.reader.next.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= N {
            panic!("SPSC ring overflow (capacity {})", N);
        }

        // SAFETY: the slot at `write` is outside the readable window
        // [read, write), so the consumer will not touch it until the index
        // is published by commit_write().
        unsafe { &mut (*self.slots.get())[write & Self::MASK] }
    }

    /// Publishes the slot handed out by the previous `next_to_write` call.
    /// Producer thread only.
    #[inline]
    pub fn commit_write(&self) {
        let write = self.writer.next.load(Ordering::Relaxed);
        self.writer.next.store(write.wrapping_add(1), Ordering::Release);
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Returns the oldest unconsumed slot, or `None` when the ring is empty.
    ///
    /// Must only be called from the consumer thread. The returned reference
    /// is invalidated by [`commit_read`](Self::commit_read).
    #[inline]
    pub fn next_to_read(&self) -> Option<&T> {
        let read = self.reader.next.load(Ordering::Relaxed);
        let write = self.writer.next.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        // SAFETY: read < write, so the producer has published this slot and
        // will not rewrite it until the read index moves past it.
        Some(unsafe { &(*self.slots.get())[read & Self::MASK] })
    }

    /// Releases the slot handed out by the previous `next_to_read` call.
    /// Consumer thread only.
    #[inline]
    pub fn commit_read(&self) {
        let read = self.reader.next.load(Ordering::Relaxed);
        self.reader.next.store(read.wrapping_add(1), Ordering::Release);
        self.count.fetch_sub(1, Ordering::Release);
    }

    /// Writes `item` and publishes it, or returns it back when the ring is
    /// full. For producers that are allowed to drop (the logger); pipeline
    /// stages use the two-phase API and treat overflow as fatal.
    #[inline]
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let write = self.writer.next.load(Ordering::Relaxed);
        let read = self.reader.next.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= N {
            return Err(item);
        }

        // SAFETY: same argument as next_to_write.
        unsafe {
            (*self.slots.get())[write & Self::MASK] = item;
        }
        self.writer.next.store(write.wrapping_add(1), Ordering::Release);
        self.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Approximate element count. Exact only when the peer thread is quiescent.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Default, const N: usize> Default for LFQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn new_ring_is_empty() {
        let q: LFQueue<u64, 8> = LFQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        assert_eq!(q.capacity(), 8);
        assert!(q.next_to_read().is_none());
    }

    #[test]
    fn two_phase_write_then_read() {
        let q: LFQueue<u64, 8> = LFQueue::new();

        *q.next_to_write() = 42;
        q.commit_write();
        assert_eq!(q.len(), 1);

        assert_eq!(q.next_to_read(), Some(&42));
        q.commit_read();
        assert!(q.is_empty());
        assert!(q.next_to_read().is_none());
    }

    #[test]
    fn fifo_order_preserved() {
        let q: LFQueue<u32, 16> = LFQueue::new();
        for i in 0..10 {
            *q.next_to_write() = i;
            q.commit_write();
        }
        for i in 0..10 {
            assert_eq!(q.next_to_read(), Some(&i));
            q.commit_read();
        }
    }

    #[test]
    fn wraparound_many_times() {
        let q: LFQueue<u32, 4> = LFQueue::new();
        for round in 0..100u32 {
            for i in 0..4 {
                *q.next_to_write() = round * 4 + i;
                q.commit_write();
            }
            for i in 0..4 {
                assert_eq!(q.next_to_read(), Some(&(round * 4 + i)));
                q.commit_read();
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn uncommitted_write_is_invisible() {
        let q: LFQueue<u32, 4> = LFQueue::new();
        *q.next_to_write() = 7;
        // No commit - the consumer must not see the slot.
        assert!(q.next_to_read().is_none());
        q.commit_write();
        assert_eq!(q.next_to_read(), Some(&7));
    }

    #[test]
    fn try_push_returns_item_when_full() {
        let q: LFQueue<u32, 2> = LFQueue::new();
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert_eq!(q.try_push(3), Err(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    #[should_panic(expected = "ring overflow")]
    fn two_phase_overflow_is_fatal() {
        let q: LFQueue<u32, 2> = LFQueue::new();
        for i in 0..3 {
            *q.next_to_write() = i;
            q.commit_write();
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_capacity_rejected() {
        let _q: LFQueue<u32, 6> = LFQueue::new();
    }

    #[test]
    fn cross_thread_transfer() {
        const COUNT: u64 = 100_000;
        let q: Arc<LFQueue<u64, 1024>> = Arc::new(LFQueue::new());

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let mut sent = 0u64;
                while sent < COUNT {
                    if q.try_push(sent).is_ok() {
                        sent += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < COUNT {
            if let Some(&v) = q.next_to_read() {
                assert_eq!(v, expected);
                q.commit_read();
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }

        producer.join().unwrap();
        assert!(q.is_empty());
    }
}
