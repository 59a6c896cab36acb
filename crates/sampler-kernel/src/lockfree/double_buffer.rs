//! Double-buffered config publication (spec §4.1).
//!
//! One writer (the control thread) builds a new snapshot and commits it;
//! any number of readers (the RT thread, the disk worker, a metrics
//! poller) load the current snapshot with a single atomic pointer read
//! and never block on the writer, and the writer never blocks on a
//! reader still holding an old snapshot. Grounded on the
//! `ArcSwap`-backed commit pattern used for the MIDI routing table: the
//! writer owns a plain value, mutates it locally, and publishes the
//! whole thing atomically rather than mutating shared fields in place.

use arc_swap::{ArcSwap, Guard};
use std::sync::Arc;

/// A value published by one writer and read lock-free by many readers.
///
/// `T` is swapped in whole: there is no partial update, so readers never
/// observe a torn mix of old and new fields. Clone a `DoubleBuffered<T>`
/// to hand a reader its own handle to the same underlying `ArcSwap`.
pub struct DoubleBuffered<T> {
    current: Arc<ArcSwap<T>>,
}

impl<T> DoubleBuffered<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Lock-free read of the current snapshot. Safe to call from the
    /// RT thread; never allocates, never blocks.
    #[inline]
    pub fn load(&self) -> Guard<Arc<T>> {
        self.current.load()
    }

    /// Publish a new snapshot, replacing whatever was there. Readers
    /// mid-`load()` still see a consistent (old or new) value, never a
    /// mix of the two.
    pub fn store(&self, value: T) {
        self.current.store(Arc::new(value));
    }

    /// Build a new snapshot from the current one and publish it.
    /// Convenience for "copy, mutate one field, commit" call sites.
    pub fn rcu(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.current.load());
        self.store(next);
    }
}

impl<T> Clone for DoubleBuffered<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
        }
    }
}
