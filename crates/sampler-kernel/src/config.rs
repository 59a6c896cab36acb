//! Sampler engine configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Voice-stealing policy applied when `LaunchVoice` finds the pool full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceStealStrategy {
    /// Prefer the oldest voice on the same key being (re)triggered,
    /// falling back to the oldest voice on the oldest active key.
    KeyMask,
    /// Always steal the oldest voice on the oldest active key.
    OldestKey,
    /// Never steal; drop the triggering note instead.
    None,
}

impl Default for VoiceStealStrategy {
    fn default() -> Self {
        VoiceStealStrategy::KeyMask
    }
}

/// Configuration shared by every `Engine` instance built on top of this
/// crate's primitives. Validated once, at construction time; never
/// mutated on the RT path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Audio device sample rate, in Hz.
    pub sample_rate: f64,
    /// Upper bound on samples requested per `Engine::render` call.
    /// Device output buffers are sized to this; `render(n)` requires
    /// `n <= max_samples_per_cycle`.
    pub max_samples_per_cycle: usize,
    /// Fixed capacity of the voice pool, shared across every channel
    /// bound to one `Engine` (spec invariant: live voices <= this).
    pub voice_pool_capacity: usize,
    /// Samples at or below this frame count are cached entirely in RAM
    /// by the disk streamer instead of streamed (the "preload" policy).
    pub preload_threshold_frames: u64,
    /// Upper bound, in samples from cycle start, within which a killed
    /// voice's fade-out must complete (avoids a click from a late kill
    /// landing past the end of the current cycle).
    pub max_fade_out_pos: usize,
    /// Capacity of each SPSC request/release ring between the RT thread
    /// and the disk worker.
    pub disk_request_queue_capacity: usize,
    /// Policy applied when the voice pool is full at trigger time.
    pub voice_steal_strategy: VoiceStealStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            max_samples_per_cycle: 4096,
            voice_pool_capacity: 256,
            preload_threshold_frames: 1 << 16,
            max_fade_out_pos: 2048,
            disk_request_queue_capacity: 64,
            voice_steal_strategy: VoiceStealStrategy::KeyMask,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000.0 || self.sample_rate > 384_000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.max_samples_per_cycle == 0 {
            return Err(Error::InvalidConfig(
                "max_samples_per_cycle must be nonzero".into(),
            ));
        }
        if self.voice_pool_capacity == 0 {
            return Err(Error::InvalidConfig(
                "voice_pool_capacity must be nonzero".into(),
            ));
        }
        if self.max_fade_out_pos > self.max_samples_per_cycle {
            return Err(Error::InvalidConfig(format!(
                "max_fade_out_pos {} exceeds max_samples_per_cycle {}",
                self.max_fade_out_pos, self.max_samples_per_cycle
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let config = EngineConfig {
            sample_rate: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fade_out_past_cycle() {
        let config = EngineConfig {
            max_samples_per_cycle: 128,
            max_fade_out_pos: 256,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
