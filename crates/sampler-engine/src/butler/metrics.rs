//! I/O statistics for the disk worker (spec §7: RT-visible failures
//! are reported via metrics the control plane can poll, not
//! exceptions). Tracks throughput, preload cache efficiency, and
//! buffer health across every bound stream.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct IOMetrics {
    bytes_read: AtomicU64,
    read_ops: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Count of refill passes that found a ring below 10% fill (spec
    /// §4.3 starvation guarantee).
    low_buffer_events: AtomicU64,
    throughput: Mutex<ThroughputTracker>,
}

impl Default for IOMetrics {
    fn default() -> Self {
        Self {
            bytes_read: AtomicU64::new(0),
            read_ops: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            low_buffer_events: AtomicU64::new(0),
            throughput: Mutex::new(ThroughputTracker::new()),
        }
    }
}

/// Tracks recent read throughput using a sliding window, used to
/// decide which stream most urgently needs a refill pass.
struct ThroughputTracker {
    recent_reads: Vec<(u64, Instant)>,
    window_secs: f64,
    cached_read_rate: f64,
}

impl ThroughputTracker {
    fn new() -> Self {
        Self {
            recent_reads: Vec::with_capacity(64),
            window_secs: 1.0,
            cached_read_rate: 0.0,
        }
    }

    fn record_read(&mut self, bytes: u64) {
        let now = Instant::now();
        self.recent_reads.push((bytes, now));
        self.update_rate(now);
    }

    fn update_rate(&mut self, now: Instant) {
        let cutoff = now - std::time::Duration::from_secs_f64(self.window_secs);
        self.recent_reads.retain(|(_, ts)| *ts > cutoff);

        if self.recent_reads.is_empty() {
            self.cached_read_rate = 0.0;
            return;
        }
        let total_bytes: u64 = self.recent_reads.iter().map(|(b, _)| *b).sum();
        if let (Some(first), Some(last)) = (self.recent_reads.first(), self.recent_reads.last()) {
            let duration = last.1.duration_since(first.1).as_secs_f64();
            self.cached_read_rate = if duration > 0.01 {
                total_bytes as f64 / duration
            } else {
                total_bytes as f64 / self.window_secs
            };
        }
    }

    fn read_rate(&self) -> f64 {
        self.cached_read_rate
    }
}

impl IOMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        if let Some(mut tracker) = self.throughput.try_lock() {
            tracker.record_read(bytes);
        }
    }

    pub fn read_rate(&self) -> f64 {
        self.throughput.lock().read_rate()
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_low_buffer(&self) {
        self.low_buffer_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IOMetricsSnapshot {
        IOMetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            read_ops: self.read_ops.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            low_buffer_events: self.low_buffer_events.load(Ordering::Relaxed),
            read_rate: self.read_rate(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IOMetricsSnapshot {
    pub bytes_read: u64,
    pub read_ops: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub low_buffer_events: u64,
    pub read_rate: f64,
}

impl IOMetricsSnapshot {
    pub fn cache_hit_rate(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            1.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }

    pub fn avg_read_size(&self) -> u64 {
        if self.read_ops == 0 {
            0
        } else {
            self.bytes_read / self.read_ops
        }
    }
}
