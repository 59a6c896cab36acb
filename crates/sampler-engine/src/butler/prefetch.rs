//! Per-voice decode rings: the disk worker is the single producer,
//! the owning voice's render path is the single consumer (spec §4.3,
//! §2 item 3: "owns per-voice ring buffers of decoded frames").
//!
//! Frames are interleaved `f32`, `channels()` samples per frame, so the
//! same ring type serves mono and stereo sources without a wrapper
//! enum — the consumer already knows its source's channel count from
//! the bind call.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Producer side, owned by the disk worker.
pub struct StreamProducer {
    prod: HeapProd<f32>,
}

impl StreamProducer {
    pub fn vacant_len(&self) -> usize {
        self.prod.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    /// Push as many frames from `samples` as fit. Returns the count of
    /// `f32` values actually written (not frames — caller divides by
    /// channel count if it needs a frame count).
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.prod.push_slice(samples)
    }
}

unsafe impl Send for StreamProducer {}

/// Consumer side, owned by the voice that requested the stream.
pub struct StreamConsumer {
    cons: HeapCons<f32>,
}

impl StreamConsumer {
    pub fn occupied_len(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    /// Pop up to `out.len()` samples. Returns the count actually read;
    /// a short read (including zero) means the worker hasn't kept up —
    /// callers fill the remainder with silence rather than blocking
    /// (spec §4.3 guarantee 2).
    pub fn pop_slice(&mut self, out: &mut [f32]) -> usize {
        self.cons.pop_slice(out)
    }
}

unsafe impl Send for StreamConsumer {}

/// Build a bound (producer, consumer) pair sized for `capacity_frames`
/// frames of `channels` samples each. Sizing is the caller's
/// responsibility (spec §4.3: "sized large enough for worst-case
/// pitched read-ahead").
pub fn stream_channel(capacity_frames: usize, channels: u16) -> (StreamProducer, StreamConsumer) {
    let capacity = (capacity_frames * channels.max(1) as usize).max(channels.max(1) as usize);
    let rb = HeapRb::<f32>::new(capacity);
    let (prod, cons) = rb.split();
    (StreamProducer { prod }, StreamConsumer { cons })
}
