//! Loop-point handling for the disk worker (spec §4.3: "honoring loop
//! points (including play-count-limited loops with reverse
//! direction)").
//!
//! This is pure position arithmetic, deliberately free of any I/O or
//! ring-buffer concerns so it can be unit tested directly: given a
//! current position and a [`LoopSpec`], decide the next position and
//! whether the loop has been exhausted.

use crate::butler::request::LoopSpec;
use crate::butler::varispeed::PlayDirection;

/// Outcome of advancing past one loop boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopAdvance {
    pub position: u64,
    pub direction: PlayDirection,
    pub wrapped: bool,
    /// `true` once `max_plays` passes have completed; the stream
    /// should fall through to non-looping end-of-sample handling.
    pub exhausted: bool,
}

/// State threaded through repeated calls to [`advance`] for one bound
/// stream: how many times the loop region has been traversed so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopCounter {
    plays_completed: u32,
}

impl LoopCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Given the position just reached after reading forward (or
    /// backward, if `spec.reverse`), apply loop wraparound if the
    /// boundary was crossed.
    pub fn advance(
        &mut self,
        position: u64,
        direction: PlayDirection,
        spec: &LoopSpec,
    ) -> LoopAdvance {
        if let Some(limit) = spec.max_plays {
            if self.plays_completed >= limit {
                return LoopAdvance {
                    position,
                    direction,
                    wrapped: false,
                    exhausted: true,
                };
            }
        }

        match direction {
            PlayDirection::Forward if position >= spec.end => {
                self.plays_completed += 1;
                let exhausted = spec
                    .max_plays
                    .is_some_and(|limit| self.plays_completed >= limit);
                let next_direction = if spec.reverse {
                    PlayDirection::Reverse
                } else {
                    PlayDirection::Forward
                };
                let next_position = if spec.reverse { spec.end } else { spec.start };
                LoopAdvance {
                    position: next_position,
                    direction: next_direction,
                    wrapped: true,
                    exhausted,
                }
            }
            PlayDirection::Reverse if position <= spec.start => {
                self.plays_completed += 1;
                let exhausted = spec
                    .max_plays
                    .is_some_and(|limit| self.plays_completed >= limit);
                // Reverse loops bounce back to forward playback through
                // the loop region rather than running off the start of
                // the file a second time.
                LoopAdvance {
                    position: spec.start,
                    direction: PlayDirection::Forward,
                    wrapped: true,
                    exhausted,
                }
            }
            _ => LoopAdvance {
                position,
                direction,
                wrapped: false,
                exhausted: false,
            },
        }
    }
}
