//! Property-based and randomized coverage for the invariants spec'd
//! as "testable properties": the voice pool capacity bound and the
//! GS scale-tune checksum accept/reject rule. Also covers realistic
//! on-disk instrument paths (`tempfile`) and float-tolerant amplitude
//! comparisons (`approx`) that a strict `==` would make too brittle.

mod support;

use std::path::PathBuf;
use std::sync::Arc;

use approx::assert_relative_eq;
use proptest::prelude::*;

use sampler_engine::{AvailabilityMode, Engine, EngineChannel, InstrumentKey, InstrumentResourceManager};
use sampler_kernel::EngineConfig;
use support::{any_nonzero, region_from_sample, render_left, tone_region, FramesSource, KeyedInstrument};

fn config(voice_pool_capacity: usize) -> EngineConfig {
    EngineConfig {
        sample_rate: 44_100.0,
        max_samples_per_cycle: 256,
        voice_pool_capacity,
        preload_threshold_frames: 1 << 16,
        max_fade_out_pos: 64,
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

fn scale_tune_payload(detune: &[u8; 12], checksum: u8) -> Vec<u8> {
    let addr = [0x40u8, 0x10, 0x40];
    let mut payload = Vec::with_capacity(20);
    payload.push(0x41);
    payload.push(0x10);
    payload.push(0x42);
    payload.push(0x12);
    payload.extend_from_slice(&addr);
    payload.extend_from_slice(detune);
    payload.push(checksum);
    payload
}

fn expected_checksum(detune: &[u8; 12]) -> u8 {
    let addr = [0x40u8, 0x10, 0x40];
    let sum: u32 = addr.iter().chain(detune.iter()).map(|&b| b as u32).sum();
    ((128 - (sum % 128)) % 128) as u8
}

proptest! {
    /// Spec §8: "a GS DT1 scale-tune sysex with checksum byte
    /// C=(128-Σaddr+data mod 128) is accepted; any other checksum is
    /// rejected." Exercised over random detune tables and random wrong
    /// checksums rather than one hand-picked example.
    #[test]
    fn correct_checksum_is_always_accepted(detune in prop::array::uniform12(0u8..=127)) {
        let engine = Engine::new(config(4)).unwrap();
        let checksum = expected_checksum(&detune);
        let payload = scale_tune_payload(&detune, checksum);
        prop_assert!(engine.submit_sysex(&payload, Some(0)));
        render_left(&engine, 256);

        let cents = engine.scale_tuning_cents();
        for i in 0..12 {
            prop_assert_eq!(cents[i], detune[i] as i8 - 64);
        }
    }

    #[test]
    fn wrong_checksum_is_always_rejected(
        detune in prop::array::uniform12(0u8..=127),
        wrong_offset in 1u8..127u8,
    ) {
        let engine = Engine::new(config(4)).unwrap();
        let correct = expected_checksum(&detune);
        let wrong = (correct as u16 + wrong_offset as u16).rem_euclid(128) as u8;
        prop_assume!(wrong != correct);

        let payload = scale_tune_payload(&detune, wrong);
        prop_assert!(engine.submit_sysex(&payload, Some(0)));
        render_left(&engine, 256);

        prop_assert_eq!(engine.scale_tuning_cents(), [0i8; 12], "rejected sysex must not touch the tuning table");
    }

    /// Spec §8: "For all cycles c: Σ_channel active_voices(c) ≤
    /// voice_pool_capacity." Random note counts against random pool
    /// sizes, both well above and below the number of notes fired.
    #[test]
    fn active_voice_count_never_exceeds_pool_capacity(
        capacity in 1usize..8,
        note_count in 1u8..20,
    ) {
        let engine = Engine::new(config(capacity)).unwrap();
        let channel = build_channel(&engine, 0);
        let region = tone_region(0.8);
        engine.preload_sample(&region.sample).unwrap();
        channel.load_instrument(Arc::new(KeyedInstrument::single(region)));

        for key in 0..note_count {
            channel.send_note_on(key, 100, Some(0));
        }

        for _ in 0..4 {
            render_left(&engine, 256);
            prop_assert!(engine.metrics().active_voice_count() as usize <= capacity);
        }
    }
}

/// Robustness check in the style of a noise-injection test: random
/// per-sample amplitude (`rand::random`) never drives the render path
/// to produce NaN/Inf, regardless of how "ugly" the source signal is.
#[test]
fn noisy_sample_never_produces_non_finite_output() {
    let engine = Engine::new(config(4)).unwrap();
    let channel = build_channel(&engine, 0);

    let frames: Vec<f32> = (0..4096)
        .map(|_| (rand::random::<f32>() - 0.5) * 2.0)
        .collect();
    let noisy = Arc::new(FramesSource::new(frames));
    engine
        .preload_sample(&(noisy.clone() as Arc<dyn sampler_engine::SampleSource>))
        .unwrap();

    let region = region_from_sample(noisy);
    channel.load_instrument(Arc::new(KeyedInstrument::single(region)));
    channel.send_note_on(60, 127, Some(0));

    for _ in 0..20 {
        let buf = render_left(&engine, 256);
        assert!(buf.iter().all(|s| s.is_finite()), "render produced a non-finite sample");
    }
}

/// CC7 (channel volume) scales the rendered peak roughly linearly;
/// tolerant comparison since envelope/filter shaping means it isn't
/// an exact halving.
#[test]
fn channel_volume_cc_attenuates_peak_amplitude() {
    let full_engine = Engine::new(config(4)).unwrap();
    let full_channel = build_channel(&full_engine, 0);
    let full_region = tone_region(1.0);
    full_engine.preload_sample(&full_region.sample).unwrap();
    full_channel.load_instrument(Arc::new(KeyedInstrument::single(full_region)));
    full_channel.send_control_change(7, 127, Some(0));
    full_channel.send_note_on(60, 127, Some(0));
    for _ in 0..4 {
        render_left(&full_engine, 256);
    }
    let full_peak = render_left(&full_engine, 256).iter().fold(0f32, |a, &b| a.max(b.abs()));

    let half_engine = Engine::new(config(4)).unwrap();
    let half_channel = build_channel(&half_engine, 0);
    let half_region = tone_region(1.0);
    half_engine.preload_sample(&half_region.sample).unwrap();
    half_channel.load_instrument(Arc::new(KeyedInstrument::single(half_region)));
    half_channel.send_control_change(7, 64, Some(0));
    half_channel.send_note_on(60, 127, Some(0));
    for _ in 0..4 {
        render_left(&half_engine, 256);
    }
    let half_peak = render_left(&half_engine, 256).iter().fold(0f32, |a, &b| a.max(b.abs()));

    assert!(any_nonzero(&[full_peak]));
    assert_relative_eq!(half_peak / full_peak, 64.0 / 127.0, epsilon = 0.05);
}

/// Realistic on-disk instrument paths: two distinct temp files cache
/// independently, and releasing one doesn't disturb the other.
#[test]
fn instrument_cache_keys_on_real_file_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path_a: PathBuf = dir.path().join("grand.gig");
    let path_b: PathBuf = dir.path().join("electric.gig");
    std::fs::write(&path_a, b"not a real instrument, just a cache key").unwrap();
    std::fs::write(&path_b, b"also just a cache key").unwrap();

    let manager: InstrumentResourceManager<u32> = InstrumentResourceManager::new();
    let key_a = InstrumentKey { file_path: path_a.clone(), index: 0 };
    let key_b = InstrumentKey { file_path: path_b.clone(), index: 0 };

    manager.insert(key_a.clone(), Arc::new(1), AvailabilityMode::OnDemand);
    manager.insert(key_b.clone(), Arc::new(2), AvailabilityMode::Persistent);

    assert_eq!(*manager.borrow(&key_a).unwrap(), 1);
    manager.release(&key_a);
    assert!(!manager.is_loaded(&key_a), "on-demand entry evicts once released");
    assert!(manager.is_loaded(&key_b), "the other path's entry is untouched");
}
