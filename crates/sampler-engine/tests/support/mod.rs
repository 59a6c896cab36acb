//! Fixtures shared by the integration tests: a minimal `SampleSource`
//! backed by a fixed tone, a single-region `InstrumentSource`, and a
//! `AudioOutputDevice` that just counts connect/disconnect calls.
//!
//! Kept out of `src/` because nothing in the crate needs it; it exists
//! purely to drive `Engine`/`EngineChannel` the way a real host would.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sampler_engine::{AudioOutputDevice, InstrumentSource, OffMode, Region, RegionQueryContext, SampleSource, TriggerKind};

/// A constant-value tone, long enough that it never runs out mid-test.
/// Every read returns the same sample value so "is this voice still
/// producing nonzero output" is a one-line check.
pub struct ToneSource {
    frames: u64,
    channels: u16,
    value: f32,
}

impl ToneSource {
    pub fn new(frames: u64, channels: u16, value: f32) -> Self {
        Self { frames, channels, value }
    }
}

impl SampleSource for ToneSource {
    fn total_frames(&self) -> u64 {
        self.frames
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frame_size(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }

    fn read(&self, out: &mut [f32]) -> std::io::Result<usize> {
        out.fill(self.value);
        Ok(out.len() / self.channels as usize)
    }

    fn set_position(&self, _frame: u64) -> std::io::Result<()> {
        Ok(())
    }

    fn read_and_loop(&self, out: &mut [f32], _loop_start: u64, _loop_end: u64) -> std::io::Result<(usize, bool)> {
        out.fill(self.value);
        Ok((out.len() / self.channels as usize, false))
    }

    fn load_sample_data(&self) -> std::io::Result<Arc<Vec<f32>>> {
        Ok(Arc::new(vec![self.value; (self.frames * self.channels as u64) as usize]))
    }

    fn cache_size(&self) -> u64 {
        self.frames * self.channels as u64 * std::mem::size_of::<f32>() as u64
    }

    fn load_sample_data_with_null_samples_extension(&self, extra_frames: usize) -> std::io::Result<Arc<Vec<f32>>> {
        let mut data = vec![self.value; (self.frames * self.channels as u64) as usize];
        data.resize(data.len() + extra_frames * self.channels as usize, 0.0);
        Ok(Arc::new(data))
    }
}

/// A mono source backed by arbitrary caller-supplied frames, e.g. random
/// noise, where a single repeated `value` wouldn't exercise anything new.
pub struct FramesSource {
    frames: Vec<f32>,
}

impl FramesSource {
    pub fn new(frames: Vec<f32>) -> Self {
        Self { frames }
    }
}

impl SampleSource for FramesSource {
    fn total_frames(&self) -> u64 {
        self.frames.len() as u64
    }

    fn channels(&self) -> u16 {
        1
    }

    fn frame_size(&self) -> usize {
        std::mem::size_of::<f32>()
    }

    fn read(&self, out: &mut [f32]) -> std::io::Result<usize> {
        let n = out.len().min(self.frames.len());
        out[..n].copy_from_slice(&self.frames[..n]);
        Ok(n)
    }

    fn set_position(&self, _frame: u64) -> std::io::Result<()> {
        Ok(())
    }

    fn read_and_loop(&self, out: &mut [f32], _loop_start: u64, _loop_end: u64) -> std::io::Result<(usize, bool)> {
        let n = self.read(out)?;
        Ok((n, false))
    }

    fn load_sample_data(&self) -> std::io::Result<Arc<Vec<f32>>> {
        Ok(Arc::new(self.frames.clone()))
    }

    fn cache_size(&self) -> u64 {
        self.frames.len() as u64 * std::mem::size_of::<f32>() as u64
    }

    fn load_sample_data_with_null_samples_extension(&self, extra_frames: usize) -> std::io::Result<Arc<Vec<f32>>> {
        let mut data = self.frames.clone();
        data.resize(data.len() + extra_frames, 0.0);
        Ok(Arc::new(data))
    }
}

pub fn region_from_sample(sample: Arc<FramesSource>) -> Region {
    Region {
        sample,
        group: 0,
        off_mode: OffMode::Normal,
        loop_start: None,
        loop_end: None,
        is_release_trigger: false,
        pan: 0.0,
        volume: 1.0,
        pitch_offset_semitones: 0.0,
    }
}

/// A rising ramp rather than a constant tone: pitch-shifted playback
/// reads a different position per output sample, so two renders at
/// different pitch ratios are only guaranteed to diverge if the
/// underlying samples actually vary with position.
pub struct RampSource {
    frames: u64,
}

impl RampSource {
    pub fn new(frames: u64) -> Self {
        Self { frames }
    }

    fn data(&self) -> Vec<f32> {
        (0..self.frames).map(|i| i as f32 / self.frames as f32).collect()
    }
}

impl SampleSource for RampSource {
    fn total_frames(&self) -> u64 {
        self.frames
    }

    fn channels(&self) -> u16 {
        1
    }

    fn frame_size(&self) -> usize {
        std::mem::size_of::<f32>()
    }

    fn read(&self, out: &mut [f32]) -> std::io::Result<usize> {
        let data = self.data();
        let n = out.len().min(data.len());
        out[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_position(&self, _frame: u64) -> std::io::Result<()> {
        Ok(())
    }

    fn read_and_loop(&self, out: &mut [f32], _loop_start: u64, _loop_end: u64) -> std::io::Result<(usize, bool)> {
        let n = self.read(out)?;
        Ok((n, false))
    }

    fn load_sample_data(&self) -> std::io::Result<Arc<Vec<f32>>> {
        Ok(Arc::new(self.data()))
    }

    fn cache_size(&self) -> u64 {
        self.frames * std::mem::size_of::<f32>() as u64
    }

    fn load_sample_data_with_null_samples_extension(&self, extra_frames: usize) -> std::io::Result<Arc<Vec<f32>>> {
        let mut data = self.data();
        data.resize(data.len() + extra_frames, 0.0);
        Ok(Arc::new(data))
    }
}

pub fn ramp_region(frames: u64) -> Region {
    Region {
        sample: Arc::new(RampSource::new(frames)),
        group: 0,
        off_mode: OffMode::Normal,
        loop_start: None,
        loop_end: None,
        is_release_trigger: false,
        pan: 0.0,
        volume: 1.0,
        pitch_offset_semitones: 0.0,
    }
}

pub fn tone_region(value: f32) -> Region {
    tone_region_with_group(value, 0)
}

pub fn tone_region_with_group(value: f32, group: u32) -> Region {
    Region {
        sample: Arc::new(ToneSource::new(4096, 1, value)),
        group,
        off_mode: OffMode::Normal,
        loop_start: None,
        loop_end: None,
        is_release_trigger: false,
        pan: 0.0,
        volume: 1.0,
        pitch_offset_semitones: 0.0,
    }
}

/// Maps every key to the same region, unless `keys` is given, in which
/// case only those keys resolve to a region at all (others are silent,
/// as a real instrument's keymap would be for unmapped keys).
pub struct KeyedInstrument {
    regions: Vec<(u8, Region)>,
}

impl KeyedInstrument {
    pub fn single(region: Region) -> Self {
        Self { regions: vec![(255, region)] }
    }

    pub fn for_keys(regions: Vec<(u8, Region)>) -> Self {
        Self { regions }
    }
}

impl InstrumentSource for KeyedInstrument {
    fn load(_file_path: &Path, _index: usize) -> std::io::Result<Self> {
        unreachable!("fixture is constructed directly in tests")
    }

    fn query(&self, ctx: &RegionQueryContext) -> Vec<Region> {
        if ctx.trigger == TriggerKind::Release {
            return Vec::new();
        }
        self.regions
            .iter()
            .filter(|(key, _)| *key == 255 || *key == ctx.key)
            .map(|(_, region)| region.clone())
            .collect()
    }
}

/// A device that hands out sequential channel indices and counts
/// connect/disconnect calls; used wherever a test goes through
/// `Sampler` rather than building an `Engine` directly.
pub struct CountingDevice {
    next_channel: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    sample_rate: f64,
    max_samples_per_cycle: usize,
}

impl CountingDevice {
    pub fn new(sample_rate: f64, max_samples_per_cycle: usize) -> Self {
        Self {
            next_channel: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sample_rate,
            max_samples_per_cycle,
        }
    }
}

impl AudioOutputDevice for CountingDevice {
    fn max_samples_per_cycle(&self) -> usize {
        self.max_samples_per_cycle
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn acquire_channels(&self, n: usize) -> Vec<usize> {
        let start = self.next_channel.fetch_add(n, Ordering::Relaxed);
        (start..start + n).collect()
    }

    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }
}

/// Render one cycle of `n` frames on a freshly-zeroed stereo pair,
/// returning the left channel (tests only ever need to know whether
/// *something* is sounding, not exact sample values).
pub fn render_left(engine: &sampler_engine::Engine, n: usize) -> Vec<f32> {
    let mut left = vec![0f32; n];
    let mut right = vec![0f32; n];
    {
        let mut bufs: [&mut [f32]; 2] = [&mut left, &mut right];
        let mut out = sampler_engine::EngineOutputBuffers { channels: &mut bufs };
        engine.render(n, &mut out);
    }
    left
}

pub fn any_nonzero(buf: &[f32]) -> bool {
    buf.iter().any(|&s| s.abs() > 1e-6)
}

pub fn first_nonzero_index(buf: &[f32]) -> Option<usize> {
    buf.iter().position(|&s| s.abs() > 1e-6)
}
