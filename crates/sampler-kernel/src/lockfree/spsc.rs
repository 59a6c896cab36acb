//! Single-producer/single-consumer ring buffer (spec §4.1).
//!
//! Capacity is fixed at construction. `push` fails if full, `pop` fails
//! if empty — neither blocks. The consumer side additionally supports
//! a non-destructive "snapshot" read: capture a cursor, read ahead from
//! it, and either `commit()` to advance the shared read position or
//! `rewind()` to discard the read and leave the ring exactly as it was.
//! This is what lets `Engine::render` import events up to `fragment_pos
//! < n` and leave anything younger in the queue for next cycle without
//! copying it back out.
//!
//! Memory ordering: the producer publishes new elements with `Release`
//! on the tail index; the consumer observes them with `Acquire` loads
//! of the tail and commits its own progress with `Release` on the head.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Slots<T> {
    capacity: usize,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: AtomicUsize, // next slot the consumer will read
    tail: AtomicUsize, // next slot the producer will write
}

unsafe impl<T: Send> Send for Slots<T> {}
unsafe impl<T: Send> Sync for Slots<T> {}

/// Construct a bound (producer, consumer) pair over a ring of fixed
/// `capacity`. Capacity is usable capacity: the ring can hold exactly
/// `capacity` elements before `push` reports full.
pub fn channel<T>(capacity: usize) -> (RingWriter<T>, RingReader<T>) {
    assert!(capacity > 0, "ring buffer capacity must be nonzero");
    // one extra slot distinguishes full from empty without a separate counter
    let slot_count = capacity + 1;
    let mut buf = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        buf.push(UnsafeCell::new(MaybeUninit::uninit()));
    }
    let slots = Arc::new(Slots {
        capacity: slot_count,
        buf: buf.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        RingWriter {
            slots: slots.clone(),
        },
        RingReader { slots },
    )
}

/// Owned by the single producer.
pub struct RingWriter<T> {
    slots: Arc<Slots<T>>,
}

unsafe impl<T: Send> Send for RingWriter<T> {}

impl<T> RingWriter<T> {
    /// Push one element. Returns the element back on failure (ring full).
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.slots.tail.load(Ordering::Relaxed);
        let head = self.slots.head.load(Ordering::Acquire);
        let next_tail = (tail + 1) % self.slots.capacity;
        if next_tail == head {
            return Err(value);
        }
        unsafe {
            (*self.slots.buf[tail].get()).write(value);
        }
        self.slots.tail.store(next_tail, Ordering::Release);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        let tail = self.slots.tail.load(Ordering::Relaxed);
        let head = self.slots.head.load(Ordering::Acquire);
        (tail + 1) % self.slots.capacity == head
    }
}

/// Owned by the single consumer.
pub struct RingReader<T> {
    slots: Arc<Slots<T>>,
}

unsafe impl<T: Send> Send for RingReader<T> {}

impl<T: Copy> RingReader<T> {
    /// Pop one element. Returns `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.slots.head.load(Ordering::Relaxed);
        let tail = self.slots.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let value = unsafe { (*self.slots.buf[head].get()).assume_init() };
        let next_head = (head + 1) % self.slots.capacity;
        self.slots.head.store(next_head, Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        let head = self.slots.head.load(Ordering::Relaxed);
        let tail = self.slots.tail.load(Ordering::Acquire);
        head == tail
    }

    /// Number of elements currently queued. Approximate under
    /// concurrent access from the producer; exact when called from the
    /// consumer thread between `pop`s (the only RT-safe use).
    pub fn len(&self) -> usize {
        let head = self.slots.head.load(Ordering::Acquire);
        let tail = self.slots.tail.load(Ordering::Acquire);
        (tail + self.slots.capacity - head) % self.slots.capacity
    }

    /// Capture a non-destructive read cursor. Reads through the
    /// snapshot do not advance the shared head until `commit()` is
    /// called; `rewind()` (dropping the snapshot) leaves the ring
    /// exactly as it was before the snapshot was taken.
    pub fn snapshot(&self) -> RingSnapshot<'_, T> {
        RingSnapshot {
            reader: self,
            cursor: self.slots.head.load(Ordering::Relaxed),
        }
    }
}

/// A non-destructive read cursor into a [`RingReader`]. Used by
/// `Engine::render` to import events up to a cycle boundary and leave
/// anything past it queued for the next cycle.
pub struct RingSnapshot<'a, T> {
    reader: &'a RingReader<T>,
    cursor: usize,
}

impl<T: Copy> RingSnapshot<'_, T> {
    /// Read the next element without consuming it from the shared ring.
    pub fn peek(&mut self) -> Option<T> {
        let tail = self.reader.slots.tail.load(Ordering::Acquire);
        if self.cursor == tail {
            return None;
        }
        let value = unsafe { (*self.reader.slots.buf[self.cursor].get()).assume_init() };
        self.cursor = (self.cursor + 1) % self.reader.slots.capacity;
        Some(value)
    }

    /// Advance the shared read cursor to match everything consumed
    /// through this snapshot so far.
    pub fn commit(self) {
        self.reader.slots.head.store(self.cursor, Ordering::Release);
    }

    /// Discard everything read through this snapshot; the ring is left
    /// exactly as it was when the snapshot was taken.
    pub fn rewind(self) {
        // dropping without storing is the rewind; spelled out for clarity
        // at call sites.
        drop(self);
    }
}

/// Convenience alias used throughout `sampler-engine` for the per-channel
/// and engine-global input event queues (spec §3, §4.6, §4.7).
pub type EventRing<T> = (RingWriter<T>, RingReader<T>);
