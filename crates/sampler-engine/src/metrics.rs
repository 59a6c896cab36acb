//! Engine-wide RT-visible counters (spec §7): transient conditions are
//! reported here instead of as errors, following the same
//! atomic-counter style as `butler::metrics::IOMetrics`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct EngineMetrics {
    active_voice_count: AtomicU32,
    active_voice_count_max: AtomicU32,
    stolen_voice_count: AtomicU64,
    dropped_event_count: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_voice_count(&self, count: u32) {
        self.active_voice_count.store(count, Ordering::Relaxed);
        self.active_voice_count_max
            .fetch_max(count, Ordering::Relaxed);
    }

    pub fn active_voice_count(&self) -> u32 {
        self.active_voice_count.load(Ordering::Relaxed)
    }

    pub fn active_voice_count_max(&self) -> u32 {
        self.active_voice_count_max.load(Ordering::Relaxed)
    }

    pub fn record_voice_stolen(&self) {
        self.stolen_voice_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stolen_voice_count(&self) -> u64 {
        self.stolen_voice_count.load(Ordering::Relaxed)
    }

    pub fn record_event_dropped(&self) {
        self.dropped_event_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_event_count.load(Ordering::Relaxed)
    }
}
