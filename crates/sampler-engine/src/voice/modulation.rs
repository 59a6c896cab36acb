//! Per-voice parameter ramps (spec §4.5: "interpolate parameter
//! trajectories" for the pitch/volume/cutoff/resonance/pan modulation
//! pipeline).
//!
//! Grounded on `tutti_core::SmoothedValue`: a target is set, the value
//! steps linearly toward it over a fixed ramp window, then holds. The
//! difference from the teacher's version is that `ModulationTrack`'s
//! target is driven by fragment-positioned events rather than a single
//! external call per block — `Voice::render` advances an event cursor
//! alongside the per-sample loop and re-targets whenever an event's
//! `fragment_pos` is reached, so a pitch bend or CC arriving mid-block
//! still lands on the correct sample (spec §3: "events delivered to
//! voices are monotonic in fragment_pos").

/// One scheduled change to a modulation destination within the current
/// cycle (spec §4.2's per-destination event lists, scoped to one
/// voice's owning channel).
#[derive(Debug, Clone, Copy)]
pub struct ModEvent {
    pub fragment_pos: u32,
    pub value: f32,
}

/// A ramped scalar parameter. Never steps discontinuously: `set_target`
/// schedules a linear approach over `ramp_samples`, avoiding the
/// zipper noise a hard jump would cause.
#[derive(Debug, Clone, Copy)]
pub struct ModulationTrack {
    current: f32,
    target: f32,
    step: f32,
    samples_remaining: u32,
    ramp_samples: u32,
}

impl ModulationTrack {
    pub fn new(initial: f32, ramp_samples: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            samples_remaining: 0,
            ramp_samples: ramp_samples.max(1),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < f32::EPSILON {
            return;
        }
        self.target = target;
        self.samples_remaining = self.ramp_samples;
        self.step = (self.target - self.current) / self.samples_remaining as f32;
    }

    /// Jump immediately, bypassing the ramp. Used to seed a voice's
    /// initial value at trigger time (spec §4.5: "set up pitch,
    /// envelope, filter, and pan initial values").
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.samples_remaining = 0;
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.samples_remaining > 0 {
            self.current += self.step;
            self.samples_remaining -= 1;
            if self.samples_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }
}

/// A read-only cursor over one cycle's worth of events for a single
/// modulation destination. Borrows the channel's per-cycle event list
/// (spec §4.2) rather than owning a copy: every voice on the channel
/// walks the same slice independently, each with its own `next` index,
/// since voices are rendered one at a time for the full block (spec
/// §4.7 step 6) rather than interleaved sample-by-sample.
pub struct EventCursor<'a> {
    events: &'a [ModEvent],
    next: usize,
}

impl<'a> EventCursor<'a> {
    pub fn new(events: &'a [ModEvent]) -> Self {
        Self { events, next: 0 }
    }

    /// Apply every event due at or before `sample_index` to `track`.
    pub fn advance_to(&mut self, sample_index: u32, track: &mut ModulationTrack) {
        while let Some(event) = self.events.get(self.next) {
            if event.fragment_pos > sample_index {
                break;
            }
            track.set_target(event.value);
            self.next += 1;
        }
    }
}

/// The four synthesis destinations plus pan, each carrying this
/// cycle's events for one voice's channel (spec §4.2, §4.5).
#[derive(Debug, Clone, Default)]
pub struct ChannelSynthEvents {
    pub pitch: Vec<ModEvent>,
    pub volume: Vec<ModEvent>,
    pub cutoff: Vec<ModEvent>,
    pub resonance: Vec<ModEvent>,
}

impl ChannelSynthEvents {
    pub fn clear(&mut self) {
        self.pitch.clear();
        self.volume.clear();
        self.cutoff.clear();
        self.resonance.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_linearly_to_target() {
        let mut track = ModulationTrack::new(0.0, 4);
        track.set_target(4.0);
        let samples: Vec<f32> = (0..4).map(|_| track.next_sample()).collect();
        assert_eq!(samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(track.next_sample(), 4.0);
    }

    #[test]
    fn set_immediate_bypasses_ramp() {
        let mut track = ModulationTrack::new(0.0, 100);
        track.set_immediate(9.0);
        assert_eq!(track.next_sample(), 9.0);
    }

    #[test]
    fn event_cursor_retargets_mid_block() {
        let events = [
            ModEvent { fragment_pos: 2, value: 10.0 },
            ModEvent { fragment_pos: 5, value: 20.0 },
        ];
        let mut cursor = EventCursor::new(&events);
        let mut track = ModulationTrack::new(0.0, 1);
        let mut seen = Vec::new();
        for i in 0..8u32 {
            cursor.advance_to(i, &mut track);
            seen.push(track.next_sample());
        }
        assert_eq!(seen[2], 10.0);
        assert_eq!(seen[5], 20.0);
    }
}
