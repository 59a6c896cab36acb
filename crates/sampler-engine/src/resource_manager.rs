//! Instrument resource manager (spec §4.4): a reference-counted cache
//! of loaded instruments shared across channels, supporting a hot-swap
//! that never invalidates an instance a voice is still rendering.
//!
//! Grounded on `tutti-sampler::butler`'s `DashMap`-backed shared tables
//! (`cache.rs`, `shared_state.rs`) for the concurrent keyed-map shape;
//! the hot-swap itself uses `arc_swap::ArcSwap`, the same crate
//! `sampler_kernel::lockfree::double_buffer::DoubleBuffered` wraps for
//! its own atomic-publish primitive.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Eviction policy for an entry once its reference count reaches zero
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityMode {
    /// Evicted as soon as the last consumer releases it.
    OnDemand,
    /// Survives exactly one zero-refcount transition before eviction,
    /// so a quick reload right after release doesn't re-hit disk.
    OnDemandHold,
    /// Loaded eagerly, never evicted.
    Persistent,
}

/// Key a consumer borrows by: the instrument file plus which
/// instrument within it (a file can hold several).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentKey {
    pub file_path: PathBuf,
    pub index: usize,
}

/// Hot-swap callback (spec §4.4: "pre-notifies each consumer... then
/// post-notifies with (old, new, opaque)"). Implemented by whatever
/// owns the per-region state that needs republishing around a swap;
/// this manager only guarantees the call order around the atomic
/// install.
pub trait SwapListener<I>: Send + Sync {
    fn before_swap(&self, key: &InstrumentKey);
    fn after_swap(&self, key: &InstrumentKey, old: &Arc<I>, new: &Arc<I>);
}

struct InstrumentEntry<I> {
    instrument: ArcSwap<I>,
    mode: AvailabilityMode,
    ref_count: AtomicU32,
    /// Counts zero-refcount transitions already spent; `OnDemandHold`
    /// evicts on the second one, not the first.
    zero_transitions: AtomicU32,
}

/// Reference-counted cache of `{file_path, instrument_index} ->
/// instrument` (spec §4.4). `borrow`/`release` track consumers;
/// `replace` hot-swaps the instance behind a stable `Arc` so voices
/// already holding the old one keep rendering it to completion.
pub struct InstrumentResourceManager<I> {
    entries: DashMap<InstrumentKey, InstrumentEntry<I>>,
    /// Per-sample reference counts, keyed by the sample's `Arc`
    /// pointer identity (spec §4.4: "the manager tracks per-region and
    /// per-sample refcounts; teardown... is deferred until refcount
    /// reaches zero").
    sample_refcounts: DashMap<usize, AtomicU64>,
}

impl<I> Default for InstrumentResourceManager<I> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            sample_refcounts: DashMap::new(),
        }
    }
}

impl<I> InstrumentResourceManager<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly loaded instrument under `key` (first
    /// consumer's load, or an eager `Persistent` load at startup).
    pub fn insert(&self, key: InstrumentKey, instrument: Arc<I>, mode: AvailabilityMode) {
        self.entries.insert(
            key,
            InstrumentEntry {
                instrument: ArcSwap::new(instrument),
                mode,
                ref_count: AtomicU32::new(0),
                zero_transitions: AtomicU32::new(0),
            },
        );
    }

    /// Borrow the instrument at `key`, incrementing its reference
    /// count. `None` if nothing is loaded under that key.
    pub fn borrow(&self, key: &InstrumentKey) -> Option<Arc<I>> {
        let entry = self.entries.get(key)?;
        entry.ref_count.fetch_add(1, Ordering::AcqRel);
        Some(entry.instrument.load_full())
    }

    /// Release a previously `borrow`ed reference. Evicts the entry once
    /// the count reaches zero, per its `AvailabilityMode`.
    pub fn release(&self, key: &InstrumentKey) {
        let should_remove = {
            let Some(entry) = self.entries.get(key) else {
                return;
            };
            let previous = entry.ref_count.fetch_sub(1, Ordering::AcqRel);
            if previous != 1 {
                false
            } else {
                match entry.mode {
                    AvailabilityMode::Persistent => false,
                    AvailabilityMode::OnDemand => true,
                    AvailabilityMode::OnDemandHold => {
                        entry.zero_transitions.fetch_add(1, Ordering::AcqRel) >= 1
                    }
                }
            }
        };
        if should_remove {
            self.entries.remove(key);
        }
    }

    /// Hot-swap the instrument at `key` (spec §4.4: pre-notify,
    /// atomically install, post-notify). Voices already holding the
    /// old `Arc<I>` keep it alive; only new `borrow` calls observe the
    /// replacement.
    pub fn replace(&self, key: &InstrumentKey, new_instrument: Arc<I>, listener: &dyn SwapListener<I>) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        listener.before_swap(key);
        let old = entry.instrument.swap(new_instrument.clone());
        listener.after_swap(key, &old, &new_instrument);
    }

    pub fn is_loaded(&self, key: &InstrumentKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bump the refcount for a shared sample object, identified by its
    /// `Arc` pointer.
    pub fn retain_sample(&self, sample_ptr: usize) {
        self.sample_refcounts
            .entry(sample_ptr)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Release a sample reference. Returns `true` if it just reached
    /// zero — the caller should tear down the underlying decode now.
    pub fn release_sample(&self, sample_ptr: usize) -> bool {
        let just_emptied = match self.sample_refcounts.get(&sample_ptr) {
            Some(entry) => entry.fetch_sub(1, Ordering::AcqRel) == 1,
            None => return false,
        };
        if just_emptied {
            self.sample_refcounts.remove(&sample_ptr);
        }
        just_emptied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingListener {
        before_calls: AtomicUsize,
        after_calls: AtomicUsize,
    }

    impl SwapListener<u32> for RecordingListener {
        fn before_swap(&self, _key: &InstrumentKey) {
            self.before_calls.fetch_add(1, Ordering::Relaxed);
        }
        fn after_swap(&self, _key: &InstrumentKey, old: &Arc<u32>, new: &Arc<u32>) {
            self.after_calls.fetch_add(1, Ordering::Relaxed);
            assert_ne!(**old, **new);
        }
    }

    fn key() -> InstrumentKey {
        InstrumentKey {
            file_path: PathBuf::from("grand.gig"),
            index: 0,
        }
    }

    #[test]
    fn borrow_missing_key_returns_none() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        assert!(manager.borrow(&key()).is_none());
    }

    #[test]
    fn on_demand_entry_evicts_at_zero_refcount() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        manager.insert(key(), Arc::new(1), AvailabilityMode::OnDemand);
        let borrowed = manager.borrow(&key()).unwrap();
        assert_eq!(*borrowed, 1);
        assert!(manager.is_loaded(&key()));
        manager.release(&key());
        assert!(!manager.is_loaded(&key()));
    }

    #[test]
    fn persistent_entry_survives_zero_refcount() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        manager.insert(key(), Arc::new(1), AvailabilityMode::Persistent);
        manager.borrow(&key());
        manager.release(&key());
        assert!(manager.is_loaded(&key()));
    }

    #[test]
    fn on_demand_hold_survives_one_transition_then_evicts() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        manager.insert(key(), Arc::new(1), AvailabilityMode::OnDemandHold);

        manager.borrow(&key());
        manager.release(&key());
        assert!(manager.is_loaded(&key()), "first zero-refcount transition is held");

        manager.borrow(&key());
        manager.release(&key());
        assert!(!manager.is_loaded(&key()), "second transition evicts");
    }

    #[test]
    fn replace_swaps_without_invalidating_an_already_borrowed_instance() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        manager.insert(key(), Arc::new(1), AvailabilityMode::Persistent);
        let old_handle = manager.borrow(&key()).unwrap();

        let listener = RecordingListener {
            before_calls: AtomicUsize::new(0),
            after_calls: AtomicUsize::new(0),
        };
        manager.replace(&key(), Arc::new(2), &listener);

        assert_eq!(*old_handle, 1, "voice already holding the old Arc keeps seeing it");
        assert_eq!(*manager.borrow(&key()).unwrap(), 2);
        assert_eq!(listener.before_calls.load(Ordering::Relaxed), 1);
        assert_eq!(listener.after_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sample_refcount_reaches_zero_exactly_once() {
        let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
        let ptr: usize = 0xdead_beef;
        manager.retain_sample(ptr);
        manager.retain_sample(ptr);
        assert!(!manager.release_sample(ptr));
        assert!(manager.release_sample(ptr));
    }
}
