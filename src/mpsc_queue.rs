//! Lock-Free MPSC (Multiple Producer Single Consumer) Queue
//!
//! Any number of threads offer command records; exactly one conductor
//! drains them.
//!
//! # Design
//! - Power-of-two ring of slots, each carrying a sequence number
//! - Producers: check slot sequence -> CAS tail to claim -> write -> publish
//! - Consumer: check slot sequence -> read -> release slot for the next lap
//!
//! A slot at position `p` is free for the producer that claims `p` when its
//! sequence equals `p`, and holds a published record when its sequence equals
//! `p + 1`. The consumer hands it back by storing `p + capacity`.
//!
//! # Guarantees
//! - `offer` never blocks and fails once `tail - head == capacity`
//! - `drain` observes records in claim order, so each producer's records
//!   arrive in the order that producer offered them
//! - Only [`MpscConsumer`] can drain, and it needs `&mut self`

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Padding to cache line
#[repr(C, align(64))]
struct CachePadded<T>(T);

/// A single record slot
struct Slot<T> {
    /// Publication state, see module docs
    sequence: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Queue state shared by all producers and the consumer
struct Shared<T> {
    /// Next position producers claim
    tail: CachePadded<AtomicU64>,
    /// Next position the consumer reads
    head: CachePadded<AtomicU64>,
    mask: u64,
    slots: Box<[Slot<T>]>,
}

// SAFETY: a slot's value is only touched by the single producer that won its
// position and, after publication, by the single consumer
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        for pos in head..tail {
            let slot = &mut self.slots[(pos & self.mask) as usize];
            if *slot.sequence.get_mut() == pos + 1 {
                // SAFETY: published and never consumed
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

/// Create a bounded queue holding at least `capacity` records
///
/// Capacity is rounded up to the next power of two, and never below two:
/// with a single slot the published sequence of one lap equals the free
/// sequence of the next.
///
/// # Panics
/// If `capacity` is zero.
pub fn channel<T: Send>(capacity: usize) -> (MpscProducer<T>, MpscConsumer<T>) {
    assert!(capacity > 0, "queue capacity must be non-zero");
    let capacity = capacity.max(2).next_power_of_two();

    let slots = (0..capacity as u64)
        .map(|i| Slot {
            sequence: AtomicU64::new(i),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        tail: CachePadded(AtomicU64::new(0)),
        head: CachePadded(AtomicU64::new(0)),
        mask: capacity as u64 - 1,
        slots,
    });

    (
        MpscProducer {
            shared: Arc::clone(&shared),
        },
        MpscConsumer { shared },
    )
}

/// Producer handle for offering records
pub struct MpscProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MpscProducer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send> MpscProducer<T> {
    /// Try to enqueue a record (non-blocking)
    ///
    /// Returns `true` if published, `false` if the queue is full.
    #[inline]
    pub fn offer(&self, value: T) -> bool {
        self.try_offer(value).is_ok()
    }

    /// Like [`offer`](Self::offer), but hands the record back when full
    ///
    /// The only retry is re-reading the tail after losing a claim race.
    #[inline]
    pub fn try_offer(&self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let mut tail = shared.tail.0.load(Ordering::Relaxed);

        loop {
            let slot = &shared.slots[(tail & shared.mask) as usize];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - tail as i64;

            if diff == 0 {
                // Claim
                match shared.tail.0.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: this producer alone owns the claimed slot
                        unsafe { (*slot.value.get()).write(value) };
                        // Publish
                        slot.sequence.store(tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                // Slot still holds a record from the previous lap
                return Err(value);
            } else {
                tail = shared.tail.0.load(Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Records claimed but not yet drained (racy snapshot)
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer handle for draining records
pub struct MpscConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> MpscConsumer<T> {
    /// Hand up to `limit` published records to `handler` in claim order
    ///
    /// Stops early at the first slot whose record is claimed but not yet
    /// published. Returns the number of records drained.
    pub fn drain<F>(&mut self, mut handler: F, limit: usize) -> usize
    where
        F: FnMut(T),
    {
        let shared = &*self.shared;
        let capacity = shared.capacity() as u64;
        let mut head = shared.head.0.load(Ordering::Relaxed);
        let mut count = 0;

        while count < limit {
            let slot = &shared.slots[(head & shared.mask) as usize];
            if slot.sequence.load(Ordering::Acquire) != head + 1 {
                break;
            }

            // SAFETY: published by a producer and read exactly once here
            let value = unsafe { (*slot.value.get()).assume_init_read() };

            // Release slot for the next lap
            slot.sequence.store(head + capacity, Ordering::Release);
            head += 1;
            shared.head.0.store(head, Ordering::Release);

            handler(value);
            count += 1;
        }

        count
    }

    /// Drain every record currently published
    pub fn drain_all<F>(&mut self, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.drain(handler, usize::MAX)
    }

    /// Create another producer for this queue
    pub fn producer(&self) -> MpscProducer<T> {
        MpscProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
