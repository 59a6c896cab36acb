//! MIDI input port dispatch (spec §6), grounded directly on
//! `MidiInputPort::DispatchNoteOn`/`DispatchNoteOff`/`DispatchPitchbend`:
//! a channel map routes each message to every [`EngineChannel`] bound to
//! its MIDI channel plus every channel bound to the wildcard "all
//! channels" entry, and a separate low-priority fan-out additionally
//! notifies UI/monitoring listeners.
//!
//! The channel map and listener list are the only state here; they are
//! built the way the teacher builds its MIDI routing table — mutated on
//! the control thread, published via [`DoubleBuffered`] for lock-free
//! reads from whatever thread the concrete MIDI transport calls
//! `dispatch_*` from.

use crate::channel::EngineChannel;
use sampler_kernel::lockfree::double_buffer::DoubleBuffered;
use std::sync::Arc;

/// "Listen to every MIDI channel" subscription, matching the source's
/// `midi_chan_all` sentinel.
pub const MIDI_CHANNEL_ALL: usize = 16;

/// Low-priority fan-out target for note on/off, used by UIs and
/// monitoring — never by anything on the RT render path. Implemented
/// externally; this crate only calls into it.
pub trait VirtualMidiListener: Send + Sync {
    fn note_on_observed(&self, key: u8, velocity: u8);
    fn note_off_observed(&self, key: u8, velocity: u8);
}

#[derive(Clone)]
struct RoutingTable {
    /// Index 0..=15 are concrete MIDI channels; index
    /// [`MIDI_CHANNEL_ALL`] is the wildcard subscription.
    channel_map: [Vec<Arc<EngineChannel>>; 17],
    listeners: Vec<Arc<dyn VirtualMidiListener>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            channel_map: Default::default(),
            listeners: Vec::new(),
        }
    }
}

/// Dispatches MIDI input to every [`EngineChannel`] bound to it. One
/// `MidiPortRouter` models one physical/virtual MIDI input port (spec
/// §6); a concrete transport (ALSA, JACK MIDI, a virtual keyboard UI)
/// decodes raw bytes and calls `dispatch_*` here.
pub struct MidiPortRouter {
    table: DoubleBuffered<RoutingTable>,
}

impl MidiPortRouter {
    pub fn new() -> Self {
        Self {
            table: DoubleBuffered::new(RoutingTable::default()),
        }
    }

    /// Subscribe `channel` to MIDI channel `midi_channel` (0..=15), or
    /// to the wildcard if `midi_channel` is `None`.
    pub fn subscribe(&self, midi_channel: Option<u8>, channel: Arc<EngineChannel>) {
        let index = midi_channel.map(|c| c as usize).unwrap_or(MIDI_CHANNEL_ALL);
        self.table.rcu(|current| {
            let mut next = current.clone();
            if !next.channel_map[index]
                .iter()
                .any(|existing| Arc::ptr_eq(existing, &channel))
            {
                next.channel_map[index].push(channel.clone());
            }
            next
        });
    }

    pub fn unsubscribe(&self, midi_channel: Option<u8>, channel: &Arc<EngineChannel>) {
        let index = midi_channel.map(|c| c as usize).unwrap_or(MIDI_CHANNEL_ALL);
        self.table.rcu(|current| {
            let mut next = current.clone();
            next.channel_map[index].retain(|existing| !Arc::ptr_eq(existing, channel));
            next
        });
    }

    pub fn connect_virtual_device(&self, listener: Arc<dyn VirtualMidiListener>) {
        self.table.rcu(|current| {
            let mut next = current.clone();
            next.listeners.push(listener.clone());
            next
        });
    }

    fn targets(&self, midi_channel: u8) -> (Vec<Arc<EngineChannel>>, Vec<Arc<dyn VirtualMidiListener>>) {
        let table = self.table.load();
        let mut targets = table.channel_map[midi_channel as usize].clone();
        targets.extend(table.channel_map[MIDI_CHANNEL_ALL].iter().cloned());
        (targets, table.listeners.clone())
    }

    pub fn dispatch_note_on(&self, key: u8, velocity: u8, midi_channel: u8, fragment_pos: u32) {
        if key > 127 || velocity > 127 || midi_channel > 15 {
            return;
        }
        let (targets, listeners) = self.targets(midi_channel);
        for target in &targets {
            target.send_note_on(key, velocity, Some(fragment_pos));
        }
        for listener in &listeners {
            listener.note_on_observed(key, velocity);
        }
    }

    pub fn dispatch_note_off(&self, key: u8, velocity: u8, midi_channel: u8, fragment_pos: u32) {
        if key > 127 || velocity > 127 || midi_channel > 15 {
            return;
        }
        let (targets, listeners) = self.targets(midi_channel);
        for target in &targets {
            target.send_note_off(key, velocity, Some(fragment_pos));
        }
        for listener in &listeners {
            listener.note_off_observed(key, velocity);
        }
    }

    pub fn dispatch_pitch_bend(&self, value_14bit: u16, midi_channel: u8, fragment_pos: u32) {
        if midi_channel > 15 {
            return;
        }
        let (targets, _) = self.targets(midi_channel);
        for target in &targets {
            target.send_pitch_bend(value_14bit, Some(fragment_pos));
        }
    }

    pub fn dispatch_control_change(
        &self,
        controller: u8,
        value: u8,
        midi_channel: u8,
        fragment_pos: u32,
    ) {
        if controller > 127 || value > 127 || midi_channel > 15 {
            return;
        }
        let (targets, _) = self.targets(midi_channel);
        for target in &targets {
            target.send_control_change(controller, value, Some(fragment_pos));
        }
    }
}

impl Default for MidiPortRouter {
    fn default() -> Self {
        Self::new()
    }
}
