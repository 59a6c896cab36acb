//! Per-voice amplitude envelope (spec §3/§4.5: "envelope/filter state").
//!
//! A plain four-stage AR/D/S/R generator. Release is driven externally
//! (`Voice` calls `release()` from NoteOff/sustain-up/end-of-sample
//! handling per spec §4.5); envelope completion (`is_done`) is one of
//! the two paths to `VoiceState::Idle`, the other being a `Kill`
//! fade-out which bypasses the envelope entirely (spec §4.5: "A Kill
//! transitions to FadingOut with remaining-kill-samples set").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvelopeParams {
    pub attack_secs: f32,
    pub decay_secs: f32,
    pub sustain_level: f32,
    pub release_secs: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack_secs: 0.002,
            decay_secs: 0.05,
            sustain_level: 1.0,
            release_secs: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    stage: Stage,
    level: f32,
    attack_step: f32,
    decay_step: f32,
    sustain_level: f32,
    release_step: f32,
}

impl Envelope {
    pub fn new(params: EnvelopeParams, sample_rate: f64) -> Self {
        let rate_samples = |secs: f32| (secs.max(0.0001) as f64 * sample_rate).max(1.0) as f32;
        Self {
            stage: Stage::Attack,
            level: 0.0,
            attack_step: 1.0 / rate_samples(params.attack_secs),
            decay_step: (1.0 - params.sustain_level).max(0.0) / rate_samples(params.decay_secs),
            sustain_level: params.sustain_level.clamp(0.0, 1.0),
            release_step: 1.0 / rate_samples(params.release_secs),
        }
    }

    /// Begin the release stage (spec §4.5 release semantics). A
    /// release requested while still in Attack/Decay releases from the
    /// current level, not from full scale.
    pub fn release(&mut self) {
        if self.stage != Stage::Done {
            self.stage = Stage::Release;
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == Stage::Release
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            Stage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = if self.sustain_level >= 1.0 {
                        Stage::Sustain
                    } else {
                        Stage::Decay
                    };
                }
                self.level
            }
            Stage::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.sustain_level {
                    self.level = self.sustain_level;
                    self.stage = Stage::Sustain;
                }
                self.level
            }
            Stage::Sustain => self.sustain_level,
            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Done;
                }
                self.level
            }
            Stage::Done => 0.0,
        }
    }
}
