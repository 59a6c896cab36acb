//! The event model (spec §3, §4.2): a `Copy` tagged union carried
//! through SPSC queues from the control plane to the render loop.
//!
//! Constructors validate their arguments and return `Result` rather
//! than silently clamping, mirroring `tutti-midi`'s event constructors
//! but stricter: spec §7 requires malformed events to be dropped with
//! a logged warning rather than accepted in a biased/clamped form.

use crate::error::{Error, Result};

/// Which per-cycle synthesis destination an event's effect is routed
/// to once dispatched (spec §4.2, §4.7 step 5). The engine accumulates
/// one event list per destination per cycle; voices read from these
/// during render rather than each re-parsing raw MIDI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthDestination {
    /// VCO — pitch bend, note pitch.
    Pitch,
    /// VCA — volume/velocity/CC7/CC11.
    Volume,
    /// VCF cutoff.
    Cutoff,
    /// VCF resonance.
    Resonance,
}

/// Discriminant for [`Event`], matching the spec §3 set exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    PitchBend,
    ProgramChange,
    BankSelectMsb,
    BankSelectLsb,
    ChannelPressure,
    Sysex,
    CancelRelease,
    Release,
}

/// The tagged payload carried by an [`Event`]. Which variant is valid
/// for a given [`EventKind`] is fixed (see [`Event`] constructors);
/// nothing outside this module builds an `Event` with a mismatched
/// kind/payload pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    /// NoteOn, NoteOff, Release, CancelRelease: key number and velocity.
    Note { key: u8, velocity: u8 },
    /// ControlChange: controller number and 7-bit value.
    Controller { controller: u8, value: u8 },
    /// PitchBend: 14-bit value, 0..=16383, 8192 == center.
    PitchBend { value: u16 },
    /// ProgramChange: 7-bit program number.
    Program { program: u8 },
    /// BankSelectMsb/Lsb: 7-bit bank byte.
    Bank { byte: u8 },
    /// ChannelPressure: 7-bit pressure value.
    ChannelPressure { value: u8 },
    /// Sysex: length of the payload, which lives in a side byte-ring
    /// the engine owns (spec §4.7 step 4) rather than in the event
    /// itself, keeping `Event` small and `Copy`.
    Sysex { length: u16 },
}

/// One MIDI-derived event, `Copy` so it can move through an SPSC ring
/// without allocation. `fragment_pos` is the offset in samples within
/// the cycle it targets; events delivered to voices during one
/// `Engine::render` call are monotonic in `fragment_pos` (spec §3
/// invariant).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub channel: u8,
    pub fragment_pos: u32,
}

const MAX_MIDI_CHANNEL: u8 = 15;

impl Event {
    fn check_channel(channel: u8) -> Result<()> {
        if channel > MAX_MIDI_CHANNEL {
            return Err(Error::MalformedEvent(format!(
                "channel {channel} exceeds max {MAX_MIDI_CHANNEL}"
            )));
        }
        Ok(())
    }

    fn check_7bit(field: &str, value: u8) -> Result<()> {
        if value > 127 {
            return Err(Error::MalformedEvent(format!("{field} {value} exceeds 127")));
        }
        Ok(())
    }

    /// Clamp an unspecified `fragment_pos` to 0, or validate an
    /// explicit one against the current cycle length (spec §4.6:
    /// "fragment_pos is 0 if unspecified, else clamped to [0,
    /// cycle_samples)").
    pub fn clamp_fragment_pos(fragment_pos: Option<u32>, cycle_samples: u32) -> u32 {
        match fragment_pos {
            None => 0,
            Some(p) if cycle_samples == 0 => p,
            Some(p) => p.min(cycle_samples.saturating_sub(1)),
        }
    }

    pub fn note_on(channel: u8, key: u8, velocity: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("key", key)?;
        Self::check_7bit("velocity", velocity)?;
        Ok(Self {
            kind: EventKind::NoteOn,
            payload: EventPayload::Note { key, velocity },
            channel,
            fragment_pos,
        })
    }

    pub fn note_off(channel: u8, key: u8, velocity: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("key", key)?;
        Self::check_7bit("velocity", velocity)?;
        Ok(Self {
            kind: EventKind::NoteOff,
            payload: EventPayload::Note { key, velocity },
            channel,
            fragment_pos,
        })
    }

    /// Synthetic release generated when the sustain pedal lifts (spec
    /// §4.5): carries no velocity information of its own.
    pub fn release(channel: u8, key: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("key", key)?;
        Ok(Self {
            kind: EventKind::Release,
            payload: EventPayload::Note { key, velocity: 0 },
            channel,
            fragment_pos,
        })
    }

    pub fn cancel_release(channel: u8, key: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("key", key)?;
        Ok(Self {
            kind: EventKind::CancelRelease,
            payload: EventPayload::Note { key, velocity: 0 },
            channel,
            fragment_pos,
        })
    }

    pub fn control_change(
        channel: u8,
        controller: u8,
        value: u8,
        fragment_pos: u32,
    ) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("controller", controller)?;
        Self::check_7bit("value", value)?;
        Ok(Self {
            kind: EventKind::ControlChange,
            payload: EventPayload::Controller { controller, value },
            channel,
            fragment_pos,
        })
    }

    pub fn pitch_bend(channel: u8, value: u16, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        if value > 0x3FFF {
            return Err(Error::MalformedEvent(format!(
                "pitch bend value {value} exceeds 14-bit range"
            )));
        }
        Ok(Self {
            kind: EventKind::PitchBend,
            payload: EventPayload::PitchBend { value },
            channel,
            fragment_pos,
        })
    }

    pub fn program_change(channel: u8, program: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("program", program)?;
        Ok(Self {
            kind: EventKind::ProgramChange,
            payload: EventPayload::Program { program },
            channel,
            fragment_pos,
        })
    }

    pub fn bank_select_msb(channel: u8, byte: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("bank msb", byte)?;
        Ok(Self {
            kind: EventKind::BankSelectMsb,
            payload: EventPayload::Bank { byte },
            channel,
            fragment_pos,
        })
    }

    pub fn bank_select_lsb(channel: u8, byte: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("bank lsb", byte)?;
        Ok(Self {
            kind: EventKind::BankSelectLsb,
            payload: EventPayload::Bank { byte },
            channel,
            fragment_pos,
        })
    }

    pub fn channel_pressure(channel: u8, value: u8, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Self::check_7bit("channel pressure", value)?;
        Ok(Self {
            kind: EventKind::ChannelPressure,
            payload: EventPayload::ChannelPressure { value },
            channel,
            fragment_pos,
        })
    }

    /// `length` is the size of the sysex payload, which the caller has
    /// already copied into the engine's byte-ring (spec §4.7 step 4).
    pub fn sysex(channel: u8, length: u16, fragment_pos: u32) -> Result<Self> {
        Self::check_channel(channel)?;
        Ok(Self {
            kind: EventKind::Sysex,
            payload: EventPayload::Sysex { length },
            channel,
            fragment_pos,
        })
    }

    /// Destination this event's effect is routed to for per-cycle
    /// accumulation (spec §4.2). Events with no synthesis destination
    /// (NoteOn/NoteOff/Sysex, which instead drive voice lifecycle)
    /// return `None`.
    pub fn destination(&self) -> Option<SynthDestination> {
        match self.kind {
            EventKind::PitchBend => Some(SynthDestination::Pitch),
            EventKind::ControlChange => match self.payload {
                EventPayload::Controller { controller: 7, .. }
                | EventPayload::Controller { controller: 11, .. } => Some(SynthDestination::Volume),
                EventPayload::Controller { controller: 74, .. } => Some(SynthDestination::Cutoff),
                EventPayload::Controller { controller: 71, .. } => Some(SynthDestination::Resonance),
                _ => None,
            },
            _ => None,
        }
    }
}
