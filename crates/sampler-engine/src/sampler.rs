//! Sampler façade (spec §2 item 8): binds [`EngineChannel`]s to
//! [`AudioOutputDevice`] backends behind the acquire-on-first-use,
//! free-on-last-release `Engine` lifecycle spec §4.7 describes
//! (`AcquireEngine`/`FreeEngine`). Not elaborated further by the core
//! spec beyond its binding role (spec §2: "binds channels to audio and
//! MIDI endpoints; not described further here"); MIDI routing is a
//! separate concern handled by [`crate::midi_port::MidiPortRouter`]
//! against the channels this façade hands out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sampler_kernel::EngineConfig;

use crate::audio_device::AudioOutputDevice;
use crate::channel::EngineChannel;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Identifies a device by its trait-object data pointer; devices are
/// long-lived singletons owned by the caller, so pointer identity is
/// stable for the lifetime of any engine bound to one.
fn device_key(device: &dyn AudioOutputDevice) -> usize {
    device as *const dyn AudioOutputDevice as *const () as usize
}

/// Owns the `{device -> Engine}` map (spec §4.7: "One Engine instance
/// per AudioOutputDevice") and brokers the channels built against it.
/// Concrete audio/MIDI backends, any network control protocol, and the
/// instrument database sit above this façade (spec §1); it only wires
/// the pieces spec'd here together.
pub struct Sampler {
    engines: Mutex<HashMap<usize, Arc<Engine>>>,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Return the `Engine` already bound to `device`, or construct one
    /// (spawning its disk thread and allocating its pools) on first use
    /// (spec §4.7 `AcquireEngine`).
    pub fn acquire_engine(
        &self,
        device: &dyn AudioOutputDevice,
        config: EngineConfig,
    ) -> Result<Arc<Engine>> {
        let key = device_key(device);
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&key) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(Engine::new(config)?);
        device.connect();
        engines.insert(key, engine.clone());
        Ok(engine)
    }

    /// Build a channel and bind its stereo output to `device` (spec
    /// §4.6 `ConnectAudioOutputDevice`): acquires/creates the engine,
    /// reserves output channels from the device, and attaches the new
    /// [`EngineChannel`] to it. Falls back to folding both sides onto a
    /// single device channel if the device grants only one (spec §4.6:
    /// "a device may offer fewer channels than requested"; `Engine`'s
    /// render loop already handles `left == right`).
    pub fn add_channel(
        &self,
        device: &dyn AudioOutputDevice,
        config: EngineConfig,
    ) -> Result<(Arc<Engine>, Arc<EngineChannel>)> {
        let engine = self.acquire_engine(device, config)?;

        let channel_index = engine.channel_count();
        if channel_index > u8::MAX as usize {
            return Err(Error::InvalidChannel(channel_index as u8));
        }
        let channel = Arc::new(EngineChannel::new(channel_index as u8, config));

        let granted = device.acquire_channels(2);
        match (granted.first(), granted.get(1)) {
            (Some(&left), Some(&right)) => channel.bind_output_channels(left, right),
            (Some(&mono), None) => channel.bind_output_channels(mono, mono),
            _ => {
                return Err(Error::DeviceNotFound(
                    "device granted no output channels".into(),
                ))
            }
        }

        engine.attach_channel(channel.clone());
        Ok((engine, channel))
    }

    /// Detach `channel` from `engine`, then release the engine too if
    /// this was its last attached channel (spec §4.7 `FreeEngine`:
    /// "when the last channel detaches, the Engine stops the disk
    /// thread, tears down pools, and is destroyed").
    pub fn remove_channel(
        &self,
        device: &dyn AudioOutputDevice,
        engine: &Arc<Engine>,
        channel: &Arc<EngineChannel>,
    ) {
        engine.detach_channel(channel);
        if engine.channel_count() == 0 {
            self.engines.lock().remove(&device_key(device));
            device.disconnect();
        }
    }

    /// Number of devices with a live `Engine` bound to this façade.
    pub fn engine_count(&self) -> usize {
        self.engines.lock().len()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDevice {
        next_channel: AtomicUsize,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                next_channel: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }
        }
    }

    impl AudioOutputDevice for FakeDevice {
        fn max_samples_per_cycle(&self) -> usize {
            512
        }
        fn sample_rate(&self) -> f64 {
            48_000.0
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

    fn config() -> EngineConfig {
        EngineConfig {
            max_samples_per_cycle: 512,
            voice_pool_capacity: 4,
            ..Default::default()
        }
    }

    #[test]
    fn add_channel_binds_two_device_channels() {
        let sampler = Sampler::new();
        let device = FakeDevice::new();
        let (engine, channel) = sampler.add_channel(&device, config()).unwrap();
        assert_eq!(channel.output_channels(), Some((0, 1)));
        assert_eq!(engine.channel_count(), 1);
        assert_eq!(device.connects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn second_channel_shares_the_same_engine() {
        let sampler = Sampler::new();
        let device = FakeDevice::new();
        let (engine_a, _) = sampler.add_channel(&device, config()).unwrap();
        let (engine_b, _) = sampler.add_channel(&device, config()).unwrap();
        assert!(Arc::ptr_eq(&engine_a, &engine_b));
        assert_eq!(engine_a.channel_count(), 2);
        assert_eq!(sampler.engine_count(), 1);
    }

    #[test]
    fn removing_the_last_channel_tears_the_engine_down() {
        let sampler = Sampler::new();
        let device = FakeDevice::new();
        let (engine, channel) = sampler.add_channel(&device, config()).unwrap();
        sampler.remove_channel(&device, &engine, &channel);
        assert_eq!(sampler.engine_count(), 0);
        assert_eq!(device.disconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn mono_device_folds_both_sides_onto_one_channel() {
        struct MonoDevice;
        impl AudioOutputDevice for MonoDevice {
            fn max_samples_per_cycle(&self) -> usize {
                512
            }
            fn sample_rate(&self) -> f64 {
                48_000.0
            }
            fn acquire_channels(&self, _n: usize) -> Vec<usize> {
                vec![0]
            }
            fn connect(&self) {}
            fn disconnect(&self) {}
        }

        let sampler = Sampler::new();
        let device = MonoDevice;
        let (_, channel) = sampler.add_channel(&device, config()).unwrap();
        assert_eq!(channel.output_channels(), Some((0, 0)));
    }
}
