//! RAM-resident sample cache (spec §4.3): samples at or below
//! `preload_threshold_frames` are decoded once and shared by every
//! voice that plays them, with the trailing silence pad the
//! interpolator needs to read past the nominal end without a branch.
//!
//! Keyed by the `SampleSource` trait object's address rather than a
//! file path — this crate never sees a path, only whatever `Arc<dyn
//! SampleSource>` the instrument's region query handed back (spec §6).

use crate::sample_source::SampleSource;
use dashmap::DashMap;
use std::sync::Arc;

fn sample_key(sample: &Arc<dyn SampleSource>) -> usize {
    Arc::as_ptr(sample) as *const () as usize
}

/// Resident decode of a sample, fully cached in RAM.
#[derive(Clone)]
pub struct ResidentSample {
    pub frames: Arc<Vec<f32>>,
    pub channels: u16,
}

/// Cache of fully-resident samples, populated on the control thread
/// when an instrument loads (spec §4.3's "preload" policy) and read
/// lock-free by `DiskStreamer::bind` on the RT thread.
#[derive(Default)]
pub struct ResidentCache {
    entries: DashMap<usize, ResidentSample>,
}

impl ResidentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sample: &Arc<dyn SampleSource>) -> Option<ResidentSample> {
        self.entries.get(&sample_key(sample)).map(|e| e.clone())
    }

    pub fn contains(&self, sample: &Arc<dyn SampleSource>) -> bool {
        self.entries.contains_key(&sample_key(sample))
    }

    /// Decode `sample` into RAM with `pad_frames` of trailing silence
    /// if it is at or below `preload_threshold_frames` and not already
    /// cached. Non-RT: performs the actual disk read and may block.
    pub fn preload_if_short(
        &self,
        sample: &Arc<dyn SampleSource>,
        preload_threshold_frames: u64,
        pad_frames: usize,
    ) -> std::io::Result<bool> {
        let key = sample_key(sample);
        if self.entries.contains_key(&key) {
            return Ok(true);
        }
        if sample.total_frames() > preload_threshold_frames {
            return Ok(false);
        }
        let frames = sample.load_sample_data_with_null_samples_extension(pad_frames)?;
        self.entries.insert(
            key,
            ResidentSample {
                frames,
                channels: sample.channels(),
            },
        );
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
