//! End-to-end scenarios exercising `Engine`/`EngineChannel` together,
//! the way a host driving real MIDI and audio callbacks would.

mod support;

use std::sync::Arc;

use sampler_engine::{Engine, EngineChannel};
use sampler_kernel::EngineConfig;
use support::{
    any_nonzero, first_nonzero_index, ramp_region, render_left, tone_region, tone_region_with_group,
    KeyedInstrument,
};

fn config(voice_pool_capacity: usize) -> EngineConfig {
    EngineConfig {
        sample_rate: 44_100.0,
        max_samples_per_cycle: 256,
        voice_pool_capacity,
        preload_threshold_frames: 1 << 16,
        max_fade_out_pos: 128,
        disk_request_queue_capacity: 32,
        ..Default::default()
    }
}

fn build_channel(engine: &Engine, index: u8) -> Arc<EngineChannel> {
    let channel = Arc::new(EngineChannel::new(index, *engine.config()));
    channel.bind_output_channels(0, 1);
    engine.attach_channel(channel.clone());
    channel
}

/// Scenario 1: NoteOn at cycle 0, NoteOff 10 cycles later; the voice
/// sounds at p=0, then runs down through release to silence.
#[test]
fn note_on_then_note_off_reaches_idle() {
    let engine = Engine::new(config(4)).unwrap();
    let channel = build_channel(&engine, 0);
    let region = tone_region(0.8);
    engine.preload_sample(&region.sample).unwrap();
    channel.load_instrument(Arc::new(KeyedInstrument::single(region)));

    channel.send_note_on(60, 100, Some(0));
    let cycle0 = render_left(&engine, 256);
    assert_eq!(
        first_nonzero_index(&cycle0),
        Some(0),
        "voice must start sounding at fragment_pos 0"
    );

    for _ in 1..10 {
        render_left(&engine, 256);
    }

    channel.send_note_off(60, 0, Some(0));

    let mut went_silent = false;
    for _ in 0..200 {
        let buf = render_left(&engine, 256);
        if !any_nonzero(&buf) {
            went_silent = true;
            break;
        }
    }
    assert!(went_silent, "voice never reached idle after release");
    assert_eq!(channel.key_state().lock().midi_key_info[60].active_voices.len(), 0);
}

/// Scenario 2: sustain pedal defers release past NoteOff until pedal
/// comes back up.
#[test]
fn sustain_pedal_defers_release_until_pedal_up() {
    let engine = Engine::new(config(4)).unwrap();
    let channel = build_channel(&engine, 0);
    let region = tone_region(0.8);
    engine.preload_sample(&region.sample).unwrap();
    channel.load_instrument(Arc::new(KeyedInstrument::single(region)));

    channel.send_control_change(64, 127, Some(0)); // sustain down
    channel.send_note_on(60, 100, Some(0));
    render_left(&engine, 256);

    channel.send_note_off(60, 0, Some(0));
    for _ in 0..8 {
        let buf = render_left(&engine, 256);
        assert!(
            any_nonzero(&buf),
            "voice must keep sounding while the pedal is held down"
        );
        assert_eq!(channel.key_state().lock().midi_key_info[60].active_voices.len(), 1);
    }

    channel.send_control_change(64, 0, Some(0)); // sustain up
    let mut went_silent = false;
    for _ in 0..200 {
        let buf = render_left(&engine, 256);
        if !any_nonzero(&buf) {
            went_silent = true;
            break;
        }
    }
    assert!(went_silent, "voice never released once the pedal lifted");
}

/// Scenario 3: N+1 simultaneous NoteOns against a pool of capacity N
/// steal the oldest voice instead of failing, and the pool bound holds.
#[test]
fn voice_stealing_keeps_the_newest_note_sounding() {
    const CAPACITY: usize = 3;
    let engine = Engine::new(config(CAPACITY)).unwrap();
    let channel = build_channel(&engine, 0);
    let region = tone_region(0.8);
    engine.preload_sample(&region.sample).unwrap();
    channel.load_instrument(Arc::new(KeyedInstrument::single(region)));

    for key in 0..(CAPACITY as u8 + 1) {
        channel.send_note_on(60 + key, 100, Some(0));
    }

    for _ in 0..3 {
        render_left(&engine, 256);
        assert!(
            engine.metrics().active_voice_count() as usize <= CAPACITY,
            "active voice count must never exceed pool capacity"
        );
    }

    assert!(
        engine.metrics().stolen_voice_count() >= 1,
        "the (N+1)-th note must have triggered a steal rather than being dropped"
    );
    assert!(
        !channel.key_state().lock().midi_key_info[60 + CAPACITY as u8].active_voices.is_empty(),
        "the newest note must have become active"
    );
}

/// Scenario 4: two keys sharing a non-zero key group are mutually
/// exclusive; triggering the second kills the first's voice.
#[test]
fn key_group_exclusivity_kills_the_rival_key() {
    let engine = Engine::new(config(8)).unwrap();
    let channel = build_channel(&engine, 0);
    let region_36 = tone_region_with_group(0.8, 1);
    let region_38 = tone_region_with_group(0.8, 1);
    engine.preload_sample(&region_36.sample).unwrap();
    engine.preload_sample(&region_38.sample).unwrap();
    channel.load_instrument(Arc::new(KeyedInstrument::for_keys(vec![
        (36, region_36),
        (38, region_38),
    ])));

    channel.send_note_on(36, 100, Some(0));
    render_left(&engine, 256);
    assert_eq!(channel.key_state().lock().midi_key_info[36].active_voices.len(), 1);

    channel.send_note_on(38, 100, Some(0));
    render_left(&engine, 256);
    assert_eq!(
        channel.key_state().lock().key_group_table[1],
        Some(38),
        "the key group must now be held by the newly-triggered key"
    );

    let mut key_36_idle = false;
    for _ in 0..64 {
        render_left(&engine, 256);
        if channel.key_state().lock().midi_key_info[36].active_voices.is_empty() {
            key_36_idle = true;
            break;
        }
    }
    assert!(key_36_idle, "key 36's voice must be killed once key 38 claims the group");
    assert_eq!(channel.key_state().lock().midi_key_info[38].active_voices.len(), 1);
}

/// Scenario 5: a GS DT1 scale-tune sysex with the correct checksum is
/// accepted and updates the engine's per-degree tuning table; the same
/// payload with the checksum byte flipped is rejected outright.
#[test]
fn gs_scale_tune_sysex_applies_with_valid_checksum_only() {
    let engine = Engine::new(config(4)).unwrap();
    let detune = [70u8, 58, 64, 64, 64, 64, 64, 64, 64, 64, 64, 60];
    let payload = scale_tune_payload(&detune, None);
    assert!(engine.submit_sysex(&payload, Some(0)));
    render_left(&engine, 256);

    let cents = engine.scale_tuning_cents();
    assert_eq!(cents[0], 70i8 - 64);
    assert_eq!(cents[1], 58i8 - 64);
    assert_eq!(cents[11], 60i8 - 64);

    let bad_payload = scale_tune_payload(&detune, Some(0xFF));
    assert!(engine.submit_sysex(&bad_payload, Some(0)));
    render_left(&engine, 256);
    assert_eq!(
        engine.scale_tuning_cents(),
        cents,
        "a bad checksum must leave the previously-applied tuning untouched"
    );
}

fn scale_tune_payload(detune: &[u8; 12], bad_checksum: Option<u8>) -> Vec<u8> {
    let addr = [0x40u8, 0x10, 0x40];
    let sum: u32 = addr.iter().chain(detune.iter()).map(|&b| b as u32).sum();
    let checksum = bad_checksum.unwrap_or(((128 - (sum % 128)) % 128) as u8);

    let mut payload = Vec::with_capacity(20);
    payload.push(0x41); // Roland manufacturer ID
    payload.push(0x10); // device id
    payload.push(0x42); // GS model ID
    payload.push(0x12); // DT1 command
    payload.extend_from_slice(&addr);
    payload.extend_from_slice(detune);
    payload.push(checksum);
    payload
}

/// Scenario 6: pitch bend changes the pitch modulation fed to voices
/// from the bend event's fragment_pos onward. Uses a rising ramp, not
/// a constant tone: a pitch-shifted cursor reads a different position
/// per output sample, and only a varying sample will actually show
/// that in the rendered values.
#[test]
fn pitch_bend_changes_subsequent_voice_output() {
    let baseline_engine = Engine::new(config(4)).unwrap();
    let baseline_channel = build_channel(&baseline_engine, 0);
    let baseline_region = ramp_region(4096);
    baseline_engine.preload_sample(&baseline_region.sample).unwrap();
    baseline_channel.load_instrument(Arc::new(KeyedInstrument::single(baseline_region)));
    baseline_channel.send_note_on(60, 100, Some(0));
    let baseline = render_left(&baseline_engine, 256);

    let bent_engine = Engine::new(config(4)).unwrap();
    let bent_channel = build_channel(&bent_engine, 0);
    let bent_region = ramp_region(4096);
    bent_engine.preload_sample(&bent_region.sample).unwrap();
    bent_channel.load_instrument(Arc::new(KeyedInstrument::single(bent_region)));
    bent_channel.send_pitch_bend(16_383, Some(0)); // max up-bend before the note
    bent_channel.send_note_on(60, 100, Some(0));
    let bent = render_left(&bent_engine, 256);

    assert_eq!(bent_channel.pitch_bend_value(), 8191);
    assert!(any_nonzero(&baseline));
    assert!(any_nonzero(&bent));
    assert_ne!(
        baseline, bent,
        "a full-scale pitch bend must change the rendered voice output"
    );
}
