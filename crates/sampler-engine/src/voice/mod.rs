//! The `Voice` state machine (spec §3, §4.5): per-voice pitch, volume,
//! filter, and envelope state plus the sample read cursor, advanced one
//! rendered block at a time from `Engine::render` step 6.
//!
//! Grounded on `gig::Engine`'s `LaunchVoice`/voice-rendering split in
//! `original_source/trunk/src/engines/gig/Engine.cpp` and
//! `original_source/trunk/src/engines/gig/Voice.cpp`: a voice owns its
//! own cursor, pitch/volume/filter ramps, and envelope, and is rendered
//! for a full block at a time rather than sample-interleaved with its
//! siblings.

mod cursor;
mod envelope;
mod modulation;

pub use cursor::ReadCursor;
pub use envelope::{Envelope, EnvelopeParams};
pub use modulation::{ChannelSynthEvents, EventCursor, ModEvent, ModulationTrack};

use crate::butler::{DiskStreamer, LoopSpec, ResidentCache, SharedStreamState, StreamAttachPoint, StreamRequest};
use crate::instrument::{OffMode, Region};
use std::sync::Arc;

const BEND_RAMP_SAMPLES: u32 = 64;
const VOLUME_RAMP_SAMPLES: u32 = 64;
const FILTER_RAMP_SAMPLES: u32 = 128;

/// Voice lifecycle (spec §3): `Idle -> Triggered -> Playing -> Releasing
/// -> FadingOut -> Idle`. `Releasing` is the normal envelope release;
/// `FadingOut` is a bounded linear fade used to kill a voice early
/// (key-group exclusivity, voice stealing) rather than wait out its
/// release tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Triggered,
    Playing,
    Releasing,
    FadingOut,
}

/// What produced this voice (spec §3). Orthogonal to `VoiceState`: a
/// voice can be `FadingOut` while structurally still `Normal` or
/// `ReleaseTrigger` — `voice_type` drives policy (e.g. key-group kills
/// skip release-trigger voices), not the render-loop FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    Normal,
    /// A normal voice whose region demands a companion release-trigger
    /// voice be spawned when this one's key is released.
    ReleaseTriggerRequired,
    /// This voice itself was spawned on `Release`, not `NoteOn`.
    ReleaseTrigger,
}

/// A one-pole low-pass with ramped cutoff/resonance targets. A full
/// multi-mode filter graph is out of scope (spec §1 excludes general
/// DSP); this is enough to expose the cutoff/resonance modulation
/// destinations spec §4.2 names.
struct VoiceFilter {
    cutoff: ModulationTrack,
    resonance: ModulationTrack,
    z1: [f32; 2],
}

impl VoiceFilter {
    fn new(cutoff_initial: f32, resonance_initial: f32) -> Self {
        Self {
            cutoff: ModulationTrack::new(cutoff_initial, FILTER_RAMP_SAMPLES),
            resonance: ModulationTrack::new(resonance_initial, FILTER_RAMP_SAMPLES),
            z1: [0.0, 0.0],
        }
    }

    #[inline]
    fn process(&mut self, frame: [f32; 2]) -> [f32; 2] {
        let cutoff = self.cutoff.next_sample().clamp(0.0, 1.0);
        let _resonance = self.resonance.next_sample();
        self.z1[0] += cutoff * (frame[0] - self.z1[0]);
        self.z1[1] += cutoff * (frame[1] - self.z1[1]);
        self.z1
    }
}

/// Decide whether `region`'s sample should be read from RAM or from a
/// freshly-bound disk stream, and build the matching [`ReadCursor`].
/// Kept out of [`Voice::trigger`] so the voice itself never touches
/// `ResidentCache`/`DiskStreamer` directly (spec §4.3: the RT thread
/// only ever consults the cache or reads from an already-bound ring).
pub fn build_cursor(
    region: &Region,
    voice_slot: usize,
    resident_cache: &ResidentCache,
    disk_streamer: &DiskStreamer,
    attach_point: &StreamAttachPoint,
) -> ReadCursor {
    let loop_region = region.loop_start.zip(region.loop_end);
    if let Some(resident) = resident_cache.get(&region.sample) {
        disk_streamer.metrics().record_cache_hit();
        return ReadCursor::resident(resident.frames, resident.channels, 0, loop_region);
    }
    disk_streamer.metrics().record_cache_miss();

    let channels = region.sample.channels();
    let (producer, consumer) = attach_point.new_ring(channels);
    let shared = Arc::new(SharedStreamState::new());
    let loop_spec = loop_region.map(|(start, end)| LoopSpec {
        start,
        end,
        max_plays: None,
        reverse: false,
    });
    let request = StreamRequest {
        voice_slot,
        sample: region.sample.clone(),
        channels,
        start_offset: 0,
        loop_spec,
        producer,
        shared: shared.clone(),
    };
    disk_streamer.bind(request);
    ReadCursor::streamed(consumer, channels, shared)
}

/// Everything [`Voice::trigger`] needs beyond the sample cursor itself
/// (spec §4.5: "set up pitch, envelope, filter, and pan initial
/// values").
pub struct TriggerParams<'a> {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub region: &'a Region,
    pub voice_type: VoiceType,
    /// Position within the current cycle the NoteOn/Release landed at;
    /// the voice writes silence up to this offset before it starts
    /// sounding in its first `render` call (spec §4.5 guarantee 3).
    pub fragment_pos: u32,
    pub pitch_bend_semitones: f32,
    pub scale_tuning_semitones: f32,
    pub channel_volume: f32,
    pub channel_pan: f32,
    pub sample_rate: f64,
}

/// Per-channel, per-cycle event lists plus the kill-fade budget a
/// `render` call needs (spec §4.2, §4.5).
pub struct RenderContext<'a> {
    pub pitch_events: &'a [ModEvent],
    pub volume_events: &'a [ModEvent],
    pub cutoff_events: &'a [ModEvent],
    pub resonance_events: &'a [ModEvent],
    pub max_fade_out_pos: u32,
}

/// One sounding note: cursor position, envelope stage, and ramped
/// pitch/volume/filter state (spec §3 `Voice`).
pub struct Voice {
    channel: u8,
    key: u8,
    key_group: u32,
    voice_type: VoiceType,
    off_mode: OffMode,
    state: VoiceState,
    cursor: ReadCursor,
    region_semitones: f32,
    scale_tuning_semitones: f32,
    /// Channel-wide pitch bend, ramped in semitone space rather than
    /// ratio space (spec §4.7 testable property 6: a `PitchBend` landing
    /// mid-block must still apply from its `fragment_pos` on). The
    /// resulting ratio is re-derived each sample from
    /// `region_semitones + bend + scale_tuning_semitones`, since the
    /// same channel-wide bend event produces a different ratio on every
    /// voice (each has its own region offset).
    bend: ModulationTrack,
    volume: ModulationTrack,
    /// Fixed region/velocity gain factor the live `volume` track (CC7 *
    /// CC11) is multiplied against; see the comment in [`Voice::trigger`].
    base_gain: f32,
    filter: VoiceFilter,
    pan: f32,
    envelope: Envelope,
    pending_start_offset: u32,
    remaining_kill_samples: Option<u32>,
    voice_slot: usize,
}

impl Voice {
    pub fn trigger(params: TriggerParams, cursor: ReadCursor, voice_slot: usize) -> Self {
        let region_semitones = params.region.pitch_offset_semitones;

        // `volume` ramps only the channel-wide component (CC7 volume *
        // CC11 expression): the region/velocity factor is fixed for the
        // voice's life and folded into `base_gain` instead, so a later
        // CC7/CC11 change can retarget this track without needing to
        // know the region gain that produced it (spec §4.2 Volume
        // destination).
        let velocity_gain = (params.velocity as f32 / 127.0).max(0.0001);
        let base_gain = params.region.volume * velocity_gain;
        let mut volume = ModulationTrack::new(0.0, VOLUME_RAMP_SAMPLES);
        volume.set_immediate(params.channel_volume);

        Self {
            channel: params.channel,
            key: params.key,
            key_group: params.region.group,
            voice_type: params.voice_type,
            off_mode: params.region.off_mode,
            state: VoiceState::Triggered,
            cursor,
            region_semitones,
            scale_tuning_semitones: params.scale_tuning_semitones,
            bend: ModulationTrack::new(params.pitch_bend_semitones, BEND_RAMP_SAMPLES),
            volume,
            base_gain,
            filter: VoiceFilter::new(1.0, 0.0),
            pan: (params.region.pan + params.channel_pan).clamp(-1.0, 1.0),
            envelope: Envelope::new(EnvelopeParams::default(), params.sample_rate),
            pending_start_offset: params.fragment_pos,
            remaining_kill_samples: None,
            voice_slot,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn key_group(&self) -> u32 {
        self.key_group
    }

    pub fn voice_type(&self) -> VoiceType {
        self.voice_type
    }

    pub fn off_mode(&self) -> OffMode {
        self.off_mode
    }

    pub fn voice_slot(&self) -> usize {
        self.voice_slot
    }

    pub fn is_release_trigger(&self) -> bool {
        matches!(self.voice_type, VoiceType::ReleaseTrigger)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, VoiceState::Idle)
    }

    /// Refresh the scale-tuning offset applied on top of the region's
    /// fixed pitch and the live bend ramp (spec §4.7: a GS scale-tuning
    /// sysex updates the engine-wide table; voices pick it up at the
    /// start of the next cycle they render rather than mid-block, since
    /// scale tuning changes are rare control-plane events, not
    /// per-sample modulation).
    pub fn set_scale_tuning(&mut self, scale_tuning_semitones: f32) {
        self.scale_tuning_semitones = scale_tuning_semitones;
    }

    /// Begin the normal release (NoteOff, sustain-pedal-up — spec
    /// §4.5). A no-op once the voice is already releasing or dead.
    pub fn release(&mut self) {
        if matches!(self.state, VoiceState::Triggered | VoiceState::Playing) {
            self.envelope.release();
            self.state = VoiceState::Releasing;
        }
    }

    /// Force an early fade-out bounded by `fade_samples` (spec §4.5:
    /// "A Kill transitions to FadingOut with remaining-kill-samples
    /// set"), used for key-group exclusivity and voice stealing.
    pub fn kill(&mut self, fade_samples: u32) {
        if !matches!(self.state, VoiceState::Idle) {
            self.remaining_kill_samples = Some(fade_samples.max(1));
            self.state = VoiceState::FadingOut;
        }
    }

    /// Render up to `n` samples, mixing (adding) into `out_l`/`out_r`.
    /// A voice still waiting on its `fragment_pos` offset writes
    /// silence up to that point within this same call (spec §4.5
    /// guarantee 3: "the spawned voice's first rendered sample is at
    /// position p... zero before p").
    pub fn render(&mut self, ctx: &RenderContext, n: usize, out_l: &mut [f32], out_r: &mut [f32]) {
        if self.state == VoiceState::Idle {
            return;
        }
        if self.state == VoiceState::Triggered {
            self.state = VoiceState::Playing;
        }

        let mut pitch_cursor = EventCursor::new(ctx.pitch_events);
        let mut volume_cursor = EventCursor::new(ctx.volume_events);
        let mut cutoff_cursor = EventCursor::new(ctx.cutoff_events);
        let mut resonance_cursor = EventCursor::new(ctx.resonance_events);

        let start = (self.pending_start_offset as usize).min(n);
        self.pending_start_offset = self.pending_start_offset.saturating_sub(n as u32);

        for i in start..n {
            if self.state == VoiceState::Idle {
                break;
            }
            let idx = i as u32;
            pitch_cursor.advance_to(idx, &mut self.bend);
            volume_cursor.advance_to(idx, &mut self.volume);
            cutoff_cursor.advance_to(idx, &mut self.filter.cutoff);
            resonance_cursor.advance_to(idx, &mut self.filter.resonance);

            let bend_semitones = self.bend.next_sample();
            let total_semitones = self.region_semitones + bend_semitones + self.scale_tuning_semitones;
            let ratio = 2f32.powf(total_semitones / 12.0);
            let (frame, ended) = self.cursor.next_sample(ratio);
            let filtered = self.filter.process(frame);

            let env_level = if self.state == VoiceState::FadingOut {
                let remaining = self.remaining_kill_samples.unwrap_or(0);
                let fade_total = ctx.max_fade_out_pos.max(1) as f32;
                let level = remaining as f32 / fade_total;
                if remaining == 0 {
                    self.state = VoiceState::Idle;
                } else {
                    self.remaining_kill_samples = Some(remaining - 1);
                }
                level
            } else {
                self.envelope.next_sample()
            };

            let volume = self.base_gain * self.volume.next_sample();
            let gain_l = volume * env_level * (1.0 - self.pan.max(0.0));
            let gain_r = volume * env_level * (1.0 + self.pan.min(0.0));
            out_l[i] += filtered[0] * gain_l;
            out_r[i] += filtered[1] * gain_r;

            if ended {
                // Nothing left to read: finish now rather than wait out
                // whatever's left of the envelope (spec §4.5 guarantee
                // 4, "skip the release stage if the sample itself has
                // already ended").
                self.state = VoiceState::Idle;
            } else if self.state != VoiceState::FadingOut && self.envelope.is_done() {
                self.state = VoiceState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::butler::{DiskStreamer, ResidentCache};
    use crate::sample_source::fixture::MemorySource;

    fn region(sample: Arc<dyn crate::sample_source::SampleSource>) -> Region {
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

    fn trigger_params(region: &Region) -> TriggerParams<'_> {
        TriggerParams {
            channel: 0,
            key: 60,
            velocity: 127,
            region,
            voice_type: VoiceType::Normal,
            fragment_pos: 0,
            pitch_bend_semitones: 0.0,
            scale_tuning_semitones: 0.0,
            channel_volume: 1.0,
            channel_pan: 0.0,
            sample_rate: 48_000.0,
        }
    }

    fn render_ctx(max_fade_out_pos: u32) -> RenderContext<'static> {
        RenderContext {
            pitch_events: &[],
            volume_events: &[],
            cutoff_events: &[],
            resonance_events: &[],
            max_fade_out_pos,
        }
    }

    #[test]
    fn resident_voice_plays_immediately() {
        let sample: Arc<dyn crate::sample_source::SampleSource> =
            Arc::new(MemorySource::new(vec![1.0; 16], 1));
        let cache = ResidentCache::new();
        cache.preload_if_short(&sample, 100, 4).unwrap();
        let resident = cache.get(&sample).unwrap();
        let cursor = ReadCursor::resident(resident.frames, resident.channels, 0, None);

        let region = region(sample);
        let mut voice = Voice::trigger(trigger_params(&region), cursor, 0);

        let mut out_l = vec![0.0; 8];
        let mut out_r = vec![0.0; 8];
        voice.render(&render_ctx(64), 8, &mut out_l, &mut out_r);
        assert_eq!(voice.state(), VoiceState::Playing);
        assert!(out_l.iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn pending_start_offset_silences_the_voice_until_reached() {
        let sample: Arc<dyn crate::sample_source::SampleSource> =
            Arc::new(MemorySource::new(vec![1.0; 16], 1));
        let cache = ResidentCache::new();
        cache.preload_if_short(&sample, 100, 4).unwrap();
        let resident = cache.get(&sample).unwrap();
        let cursor = ReadCursor::resident(resident.frames, resident.channels, 0, None);

        let region = region(sample);
        let mut params = trigger_params(&region);
        params.fragment_pos = 3;
        let mut voice = Voice::trigger(params, cursor, 0);

        let mut out_l = vec![0.0; 8];
        let mut out_r = vec![0.0; 8];
        voice.render(&render_ctx(64), 8, &mut out_l, &mut out_r);
        assert_eq!(&out_l[0..3], &[0.0, 0.0, 0.0]);
        assert!(out_l[3..].iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn kill_fades_out_to_idle_within_budget() {
        let sample: Arc<dyn crate::sample_source::SampleSource> =
            Arc::new(MemorySource::new(vec![1.0; 1000], 1));
        let cache = ResidentCache::new();
        cache.preload_if_short(&sample, 2000, 4).unwrap();
        let resident = cache.get(&sample).unwrap();
        let cursor = ReadCursor::resident(resident.frames, resident.channels, 0, None);

        let region = region(sample);
        let mut voice = Voice::trigger(trigger_params(&region), cursor, 0);
        voice.kill(4);
        assert_eq!(voice.state(), VoiceState::FadingOut);

        let mut out_l = vec![0.0; 16];
        let mut out_r = vec![0.0; 16];
        voice.render(&render_ctx(4), 16, &mut out_l, &mut out_r);
        assert!(voice.is_idle());
    }

    #[test]
    fn release_reaches_idle_through_envelope() {
        let sample: Arc<dyn crate::sample_source::SampleSource> =
            Arc::new(MemorySource::new(vec![1.0; 100_000], 1));
        let cache = ResidentCache::new();
        cache.preload_if_short(&sample, 200_000, 4).unwrap();
        let resident = cache.get(&sample).unwrap();
        let cursor = ReadCursor::resident(resident.frames, resident.channels, 0, None);

        let region = region(sample);
        let mut voice = Voice::trigger(trigger_params(&region), cursor, 0);
        voice.release();
        assert_eq!(voice.state(), VoiceState::Releasing);

        let mut out_l = vec![0.0; 48_000];
        let mut out_r = vec![0.0; 48_000];
        voice.render(&render_ctx(64), 48_000, &mut out_l, &mut out_r);
        assert!(voice.is_idle());
    }

    #[test]
    fn build_cursor_binds_a_stream_for_samples_not_in_the_resident_cache() {
        let sample: Arc<crate::sample_source::fixture::MemorySource> =
            Arc::new(MemorySource::new(vec![0.0; 64], 1));
        let sample: Arc<dyn crate::sample_source::SampleSource> = sample;
        let cache = ResidentCache::new();
        let (mut streamer, attach_points) = DiskStreamer::spawn(1, 32);
        let region = region(sample);

        let cursor = build_cursor(&region, 0, &cache, &streamer, &attach_points[0]);
        assert!(!cursor.has_ended());
        streamer.shutdown();
    }
}
