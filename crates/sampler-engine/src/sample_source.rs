//! The `SampleSource` contract (spec §6): a boundary trait implemented
//! by whatever decodes a concrete sample file format. Nothing in this
//! crate parses WAV/FLAC/etc — that parsing is external, per spec §1 —
//! but the disk streamer and voice render path are both written purely
//! against this trait, so any decoder that implements it plugs in.

use std::sync::Arc;

/// A source of interleaved `f32` sample frames that can be read
/// sequentially or at an arbitrary position, and whose data may be
/// fully cached in RAM ("preloaded") for samples short enough that
/// streaming from disk would be wasted motion.
///
/// Implementors are expected to be cheap to `Clone`/share via `Arc`:
/// the disk streamer holds a reference per active stream, and a
/// preloaded sample's RAM copy is shared across every voice playing it
/// concurrently.
pub trait SampleSource: Send + Sync {
    /// Total number of frames (not samples — one frame is one sample
    /// per channel) in the source.
    fn total_frames(&self) -> u64;

    /// Channel count (1 = mono, 2 = stereo; the engine does not assume
    /// a specific count beyond what voice rendering mixes down to).
    fn channels(&self) -> u16;

    /// Bytes per frame as stored by the underlying format. Informational
    /// only — the streamer and voice render path operate on `f32`
    /// frames regardless of on-disk representation.
    fn frame_size(&self) -> usize;

    /// Read up to `out.len() / channels()` frames starting at the
    /// source's current read position, advancing it. Returns the
    /// number of frames actually written into `out`.
    fn read(&self, out: &mut [f32]) -> std::io::Result<usize>;

    /// Seek to an absolute frame position.
    fn set_position(&self, frame: u64) -> std::io::Result<()>;

    /// Read up to `out.len() / channels()` frames, wrapping from
    /// `loop_end` back to `loop_start` as needed rather than stopping
    /// at end of file. Returns frames written and whether a loop
    /// wraparound occurred during this call.
    fn read_and_loop(
        &self,
        out: &mut [f32],
        loop_start: u64,
        loop_end: u64,
    ) -> std::io::Result<(usize, bool)>;

    /// Decode the entire source into RAM. Used for the preload policy
    /// (spec §4.3: sources at or below `preload_threshold_frames` are
    /// cached whole rather than streamed).
    fn load_sample_data(&self) -> std::io::Result<Arc<Vec<f32>>>;

    /// Size in bytes of a full in-RAM decode, without performing it —
    /// used by the resource manager to budget preload decisions before
    /// committing to one.
    fn cache_size(&self) -> u64;

    /// Like [`load_sample_data`](Self::load_sample_data), but the
    /// returned buffer is padded with `extra_frames` of silence beyond
    /// `total_frames()`. The render path reads ahead of the nominal end
    /// of a short, non-looping sample (interpolation and pitch-shift
    /// lookahead can run past the last real frame); padding the RAM
    /// copy once at load time means the render loop never special-cases
    /// the tail.
    fn load_sample_data_with_null_samples_extension(
        &self,
        extra_frames: usize,
    ) -> std::io::Result<Arc<Vec<f32>>>;
}
