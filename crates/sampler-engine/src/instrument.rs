//! The `InstrumentSource` contract (spec §6): instrument-file-format
//! parsing and region selection are external collaborators. This crate
//! only defines the query shape a concrete format plugs into.

use crate::sample_source::SampleSource;
use std::path::Path;
use std::sync::Arc;

/// Voice-kill behavior when a key-group victim is struck (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffMode {
    /// Kill with the voice's normal release envelope.
    Normal,
    /// Kill with a fast fade-out regardless of the voice's own release
    /// time (used for hi-hat-style choke groups).
    Fast,
}

/// One selected playback region: the sample to stream plus the
/// per-trigger parameters `Voice::trigger` needs (spec §4.5).
#[derive(Clone)]
pub struct Region {
    pub sample: Arc<dyn SampleSource>,
    /// Non-zero key-group id; voices on other keys in the same
    /// non-zero group are killed when this region triggers (spec
    /// §4.5 key-group policy).
    pub group: u32,
    pub off_mode: OffMode,
    pub loop_start: Option<u64>,
    pub loop_end: Option<u64>,
    /// Whether this region is itself a release-triggered layer (spawned
    /// on `Release`, not `NoteOn`).
    pub is_release_trigger: bool,
    pub pan: f32,
    pub volume: f32,
    pub pitch_offset_semitones: f32,
}

/// Which MIDI-derived trigger produced this query (spec §6: "trigger
/// flags").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    NoteOn,
    Release,
}

/// Everything a region query needs to select the right sample(s) for a
/// note: the channel's current MIDI/controller snapshot plus the event
/// that triggered the query (spec §6).
#[derive(Debug, Clone)]
pub struct RegionQueryContext {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    /// Current pitch bend, signed, -8192..=8191 (0 == center).
    pub bend: i16,
    /// Full 7-bit controller table (index 0..=127; index 128 reserved
    /// for channel pressure lives alongside it in `EngineChannel`, not
    /// duplicated here).
    pub controllers: [u8; 128],
    /// Bitmap of currently-held physical keys, one bit per key 0..=127.
    pub pressed_keys: [u128; 1],
    pub last_keyswitch: Option<u8>,
    pub previous_keyswitch: Option<u8>,
    pub bpm: f64,
    /// Monotonic timer, in samples, since instrument load — used by
    /// round-robin/time-based region selection rules a concrete format
    /// may implement.
    pub timer_samples: u64,
    pub trigger: TriggerKind,
}

/// A loaded, queryable instrument. Implemented externally by a concrete
/// instrument file format (spec §1 scopes format parsing out of this
/// crate); the engine only ever talks to instruments through this
/// trait.
pub trait InstrumentSource: Send + Sync {
    /// Load instrument `index` from `file_path`. Parsing failures are
    /// format-specific and surfaced as `std::io::Error` (boxed detail
    /// left to the implementor).
    fn load(file_path: &Path, index: usize) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Select the region(s) that should sound for the given query.
    /// Multiple regions can be returned for layered instruments (e.g.
    /// velocity-crossfaded layers); the engine triggers one voice per
    /// returned region.
    fn query(&self, ctx: &RegionQueryContext) -> Vec<Region>;
}
