//! Per-stream state shared between the disk worker and the RT thread
//! (spec §4.3 guarantee 2: "starvation... is reported as a fill-level
//! metric, not as audible failure").
//!
//! All fields are atomics so both sides access them lock-free; the
//! worker writes, the voice reads once per render call.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct SharedStreamState {
    /// Ring fill level, 0..=1000 representing 0.0..=1.0.
    fill_level: AtomicU32,
    /// Incremented by the voice each time a render call finds the ring
    /// emptier than it needed (starvation, not an error — spec §4.3).
    starved_reads: AtomicU64,
}

impl SharedStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fill(&self, vacant: usize, capacity: usize) {
        let filled = if capacity == 0 {
            0
        } else {
            (((capacity - vacant.min(capacity)) as f64 / capacity as f64) * 1000.0) as u32
        };
        self.fill_level.store(filled, Ordering::Relaxed);
    }

    pub fn fill_level(&self) -> f32 {
        self.fill_level.load(Ordering::Relaxed) as f32 / 1000.0
    }

    pub fn report_starved_read(&self) {
        self.starved_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn starved_reads(&self) -> u64 {
        self.starved_reads.load(Ordering::Relaxed)
    }
}
