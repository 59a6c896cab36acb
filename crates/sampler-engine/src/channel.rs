//! `EngineChannel` (spec §3, §4.6): per-channel MIDI/controller state
//! and the SPSC event queue that carries `Send*` calls from the control
//! thread to the next `Engine::render` cycle.

use parking_lot::Mutex;
use sampler_kernel::event::Event;
use sampler_kernel::lockfree::double_buffer::DoubleBuffered;
use sampler_kernel::lockfree::spsc::{self, RingReader, RingWriter};
use sampler_kernel::EngineConfig;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::instrument::InstrumentSource;
use sampler_kernel::lockfree::pool::Handle as VoiceHandle;

/// Per-key state, 128 entries per channel (spec §3 `MidiKeyInfo`).
#[derive(Debug, Clone, Default)]
pub struct MidiKeyInfo {
    pub active: bool,
    pub key_pressed: bool,
    pub release_trigger_armed: bool,
    pub round_robin_index: u32,
    /// Voices currently sounding on this key, in trigger order.
    pub active_voices: SmallVec<[VoiceHandle; 4]>,
}

impl MidiKeyInfo {
    /// Invariant (spec §3): `active` iff `active_voices` is nonempty.
    fn sync_active_flag(&mut self) {
        self.active = !self.active_voices.is_empty();
    }

    pub fn push_voice(&mut self, voice: VoiceHandle) {
        self.active_voices.push(voice);
        self.sync_active_flag();
    }

    pub fn remove_voice(&mut self, voice: VoiceHandle) {
        self.active_voices.retain(|v| *v != voice);
        self.sync_active_flag();
    }
}

const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_EXPRESSION: u8 = 11;
const CC_SUSTAIN: u8 = 64;

/// Control-change index reserved for channel pressure in the controller
/// table (spec §4.6: `[u8; 129]`, index 128 is pressure).
const CHANNEL_PRESSURE_INDEX: usize = 128;

/// A `NoteOn` that lost its steal contest this cycle: the engine's
/// voice pool was full, stealing found no eligible victim (or stealing
/// is disabled), so the request is deferred rather than dropped (spec
/// §4.7 step 7: "stealing-queue drain/retry").
///
/// Scoped per-channel rather than per-`Engine`: `original_source/trunk/
/// src/engines/gig/Engine.cpp`'s `itLastStolenVoice`/`iuiLastStolenKey`
/// are `EngineChannel` fields, reset at the end of that channel's
/// render processing each cycle. The original only ever ran one
/// channel per engine instance in practice; this port supports several
/// channels sharing one `Engine` (spec §2), so a single global queue
/// would let one channel's steal activity starve another's retries.
/// Keeping both the queue and the last-stolen bookkeeping per-channel
/// avoids that cross-channel interference without changing the
/// single-channel behavior the original relied on.
#[derive(Debug, Clone, Copy)]
pub struct PendingNoteOn {
    pub key: u8,
    pub velocity: u8,
    pub fragment_pos: u32,
    pub is_release_trigger: bool,
}

/// Per-key and key-group bookkeeping touched only from the RT thread
/// during `Engine::render` (spec §3/§4.5: `midi_key_info`,
/// `key_group_table`, `active_keys`). Bundled behind one lock rather
/// than one per field since a single key event updates several of
/// these together and the lock is never contended off the RT thread.
pub struct ChannelKeyState {
    pub midi_key_info: [MidiKeyInfo; 128],
    /// `key_group_table[group]` holds the key currently holding that
    /// key-group's voices, used to find the victim when a new note in
    /// the same group triggers (spec §4.5 key-group exclusivity).
    pub key_group_table: [Option<u8>; 128],
    pub active_keys: SmallVec<[u8; 16]>,
    /// The most recently stolen `(voice, key)` this cycle, so the
    /// stealing algorithms can advance round-robin-style instead of
    /// picking the same victim repeatedly within one render call.
    pub last_stolen: Option<(VoiceHandle, u8)>,
    /// `NoteOn`s waiting for a free voice slot after a failed steal
    /// attempt, retried without stealing at the end of the cycle.
    pub steal_queue: SmallVec<[PendingNoteOn; 4]>,
}

impl Default for ChannelKeyState {
    fn default() -> Self {
        Self {
            midi_key_info: std::array::from_fn(|_| MidiKeyInfo::default()),
            key_group_table: [None; 128],
            active_keys: SmallVec::new(),
            last_stolen: None,
            steal_queue: SmallVec::new(),
        }
    }
}

impl ChannelKeyState {
    pub fn mark_key_active(&mut self, key: u8) {
        if !self.active_keys.contains(&key) {
            self.active_keys.push(key);
        }
    }

    pub fn clear_key_if_idle(&mut self, key: u8) {
        if !self.midi_key_info[key as usize].active {
            self.active_keys.retain(|&k| k != key);
        }
    }

    /// Reset per-cycle stealing bookkeeping (spec §4.7 step 7: the
    /// queue is drained each cycle; whatever couldn't be placed even
    /// after the retry pass is dropped, not carried to the next cycle).
    pub fn end_cycle(&mut self) {
        self.last_stolen = None;
        self.steal_queue.clear();
    }
}

/// One MIDI channel bound to an [`Engine`](crate::engine::Engine).
/// Controller table, active-key set, and the pending-event queue all
/// live here; voice storage lives in the engine's shared pool (spec §5
/// "the voice pool is shared by all channels on one Engine").
pub struct EngineChannel {
    index: u8,
    event_tx: RingWriter<Event>,
    event_rx: RingReader<Event>,
    /// `[0..=127]` general controllers, `[128]` channel pressure.
    controllers: [AtomicU8; 129],
    sustain_pedal: AtomicBool,
    pitch_bend: AtomicI16,
    instrument: DoubleBuffered<Option<Arc<dyn InstrumentSource>>>,
    cycle_samples: std::sync::atomic::AtomicU32,
    key_state: Mutex<ChannelKeyState>,
    /// Bank-select state (spec §9(b): receiving bank-select alone must
    /// not change the sounding patch; only a following `ProgramChange`
    /// does, and reads this pair to resolve which instrument to load).
    bank_msb: AtomicU8,
    bank_lsb: AtomicU8,
    /// Indices into the device's `ChannelBuffers::channels` this
    /// channel writes its stereo pair to, set once by the façade from
    /// `AudioOutputDevice::acquire_channels` (spec §4.6). `usize::MAX`
    /// means "not yet bound"; `Engine::render` skips such a channel.
    output_left: AtomicUsize,
    output_right: AtomicUsize,
}

impl EngineChannel {
    pub fn new(index: u8, config: EngineConfig) -> Self {
        let (event_tx, event_rx) = spsc::channel(config.disk_request_queue_capacity.max(16));
        Self {
            index,
            event_tx,
            event_rx,
            // General MIDI default channel state (spec §4.6 is silent on
            // power-on defaults; zero-initializing volume/expression
            // would silence every voice until a host explicitly sends
            // CC7/CC11, so we seed the GM defaults instead).
            controllers: std::array::from_fn(|i| {
                let default = match i as u8 {
                    CC_VOLUME => 100,
                    CC_EXPRESSION => 127,
                    CC_PAN => 64,
                    _ => 0,
                };
                AtomicU8::new(default)
            }),
            sustain_pedal: AtomicBool::new(false),
            pitch_bend: AtomicI16::new(0),
            instrument: DoubleBuffered::new(None),
            cycle_samples: std::sync::atomic::AtomicU32::new(config.max_samples_per_cycle as u32),
            key_state: Mutex::new(ChannelKeyState::default()),
            bank_msb: AtomicU8::new(0),
            bank_lsb: AtomicU8::new(0),
            output_left: AtomicUsize::new(usize::MAX),
            output_right: AtomicUsize::new(usize::MAX),
        }
    }

    /// Bind this channel's stereo output to a pair of device channel
    /// indices (spec §4.6 `ConnectAudioOutputDevice`).
    pub fn bind_output_channels(&self, left: usize, right: usize) {
        self.output_left.store(left, Ordering::Relaxed);
        self.output_right.store(right, Ordering::Relaxed);
    }

    /// The bound `(left, right)` device channel indices, or `None` if
    /// this channel has never been connected to a device.
    pub fn output_channels(&self) -> Option<(usize, usize)> {
        let left = self.output_left.load(Ordering::Relaxed);
        let right = self.output_right.load(Ordering::Relaxed);
        if left == usize::MAX || right == usize::MAX {
            None
        } else {
            Some((left, right))
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn event_reader(&self) -> &RingReader<Event> {
        &self.event_rx
    }

    pub fn pending_event_count(&self) -> usize {
        self.event_rx.len()
    }

    fn fragment_pos(&self, explicit: Option<u32>) -> u32 {
        let cycle = self.cycle_samples.load(Ordering::Relaxed);
        Event::clamp_fragment_pos(explicit, cycle)
    }

    fn push(&self, event: Event) {
        // A full queue means the control thread is outpacing render();
        // spec §7 treats this as a transient-RT condition (dropped, not
        // an error) rather than one the caller must handle.
        let _ = self.event_tx.push(event);
    }

    pub fn send_note_on(&self, key: u8, velocity: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::note_on(self.index, key, velocity, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn send_note_off(&self, key: u8, velocity: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::note_off(self.index, key, velocity, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn send_pitch_bend(&self, value_14bit: u16, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::pitch_bend(self.index, value_14bit, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn send_control_change(&self, controller: u8, value: u8, fragment_pos: Option<u32>) {
        if let Ok(event) =
            Event::control_change(self.index, controller, value, self.fragment_pos(fragment_pos))
        {
            self.push(event);
        }
    }

    pub fn send_program_change(&self, program: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::program_change(self.index, program, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn set_bank_msb(&self, byte: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::bank_select_msb(self.index, byte, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn set_bank_lsb(&self, byte: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::bank_select_lsb(self.index, byte, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    pub fn send_channel_pressure(&self, value: u8, fragment_pos: Option<u32>) {
        if let Ok(event) = Event::channel_pressure(self.index, value, self.fragment_pos(fragment_pos)) {
            self.push(event);
        }
    }

    /// Publish a newly loaded instrument (non-RT). The RT thread reads
    /// this atomically once per cycle via [`Self::instrument`].
    pub fn load_instrument(&self, instrument: Arc<dyn InstrumentSource>) {
        self.instrument.store(Some(instrument));
    }

    pub fn instrument(&self) -> Option<Arc<dyn InstrumentSource>> {
        (**self.instrument.load()).clone()
    }

    // --- RT-thread-only state below; called only from `Engine::render` ---

    #[inline]
    pub fn controller(&self, index: u8) -> u8 {
        self.controllers[index as usize].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn channel_pressure(&self) -> u8 {
        self.controllers[CHANNEL_PRESSURE_INDEX].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sustain_pedal_down(&self) -> bool {
        self.sustain_pedal.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pitch_bend_value(&self) -> i16 {
        self.pitch_bend.load(Ordering::Relaxed)
    }

    /// Apply a CC event's effect on RT-thread-owned state (spec §4.7
    /// step 5: "update controller table, handle sustain (64), volume
    /// (7), pan (10)"). Returns whether this CC64 transition just
    /// lifted the sustain pedal (callers generate the synthetic
    /// Release events for held-but-not-physically-pressed keys).
    pub fn apply_control_change(&self, controller: u8, value: u8) -> bool {
        self.controllers[controller as usize].store(value, Ordering::Relaxed);
        match controller {
            CC_SUSTAIN => {
                let was_down = self.sustain_pedal.swap(value >= 64, Ordering::Relaxed);
                was_down && value < 64
            }
            CC_VOLUME | CC_PAN => false,
            _ => false,
        }
    }

    pub fn apply_pitch_bend(&self, value_14bit: u16) {
        self.pitch_bend
            .store(value_14bit as i16 - 8192, Ordering::Relaxed);
    }

    pub fn apply_channel_pressure(&self, value: u8) {
        self.controllers[CHANNEL_PRESSURE_INDEX].store(value, Ordering::Relaxed);
    }

    pub fn apply_bank_msb(&self, byte: u8) {
        self.bank_msb.store(byte, Ordering::Relaxed);
    }

    pub fn apply_bank_lsb(&self, byte: u8) {
        self.bank_lsb.store(byte, Ordering::Relaxed);
    }

    #[inline]
    pub fn bank_msb(&self) -> u8 {
        self.bank_msb.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bank_lsb(&self) -> u8 {
        self.bank_lsb.load(Ordering::Relaxed)
    }

    pub fn set_cycle_samples(&self, n: u32) {
        self.cycle_samples.store(n, Ordering::Relaxed);
    }

    pub fn key_state(&self) -> &Mutex<ChannelKeyState> {
        &self.key_state
    }
}
