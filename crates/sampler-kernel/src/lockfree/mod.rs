//! Lock-free primitives for real-time audio (spec §4.1).
//!
//! Three building blocks, each used for a different sharing pattern
//! between the RT thread, the disk thread, and the control thread:
//!
//! - [`spsc`]: one producer, one consumer, bounded, never blocks.
//! - [`double_buffer`]: one writer (control thread), many lock-free
//!   readers (RT thread), atomic whole-snapshot replacement.
//! - [`pool`]: fixed-capacity arena with stable handles, no heap
//!   allocation once built.

pub mod double_buffer;
pub mod pool;
pub mod spsc;

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

/// Cache-line aligned atomic `f32`, used for per-voice modulator
/// parameters that are written from the render loop and may be polled
/// by metrics/monitoring without locking.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFloat {
    value: AtomicF32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }
}

impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}
