//! The sample read cursor: pitched playback over either a RAM-resident
//! sample or a disk-streamed ring (spec §4.3, §4.5 "pitch state
//! (absolute frequency ratio + interpolation phase)").
//!
//! Both feeds are read one frame at a time and linearly interpolated
//! at a fractional phase that advances by the current pitch ratio each
//! output sample — the same shape the teacher's granular/phase-vocoder
//! processors use for fractional-position reads (`time_stretch/
//! granular.rs`), scoped down to plain linear interpolation since a
//! general resampling/DSP graph is an explicit non-goal (spec §1).
//!
//! Looping for a *streamed* voice is handled entirely by the disk
//! worker (it honors the bound `LoopSpec` before frames ever reach the
//! ring — see `butler::thread`); looping for a *resident* voice is
//! handled here, by wrapping the read position.

use crate::butler::{SharedStreamState, StreamConsumer};
use std::sync::Arc;

enum Feed {
    Resident {
        frames: Arc<Vec<f32>>,
        channels: u16,
        pos: u64,
        loop_region: Option<(u64, u64)>,
    },
    Streamed {
        consumer: StreamConsumer,
        channels: u16,
        shared: Arc<SharedStreamState>,
    },
}

/// Pulls pitched stereo frames from a sample feed, hiding whether the
/// feed is RAM-resident or disk-streamed from the render loop (spec
/// §4.3 guarantee 3: "the per-voice position is stored in the voice,
/// not in the sample").
pub struct ReadCursor {
    feed: Feed,
    frac: f32,
    cur: [f32; 2],
    next: [f32; 2],
    next_valid: bool,
    ended: bool,
}

impl ReadCursor {
    pub fn resident(
        frames: Arc<Vec<f32>>,
        channels: u16,
        start_frame: u64,
        loop_region: Option<(u64, u64)>,
    ) -> Self {
        let mut cursor = Self {
            feed: Feed::Resident {
                frames,
                channels,
                pos: start_frame,
                loop_region,
            },
            frac: 0.0,
            cur: [0.0, 0.0],
            next: [0.0, 0.0],
            next_valid: false,
            ended: false,
        };
        cursor.seed();
        cursor
    }

    pub fn streamed(consumer: StreamConsumer, channels: u16, shared: Arc<SharedStreamState>) -> Self {
        let mut cursor = Self {
            feed: Feed::Streamed {
                consumer,
                channels,
                shared,
            },
            frac: 0.0,
            cur: [0.0, 0.0],
            next: [0.0, 0.0],
            next_valid: false,
            ended: false,
        };
        cursor.seed();
        cursor
    }

    fn seed(&mut self) {
        let first = self.pull_frame();
        self.cur = first.unwrap_or([0.0, 0.0]);
        if first.is_none() {
            // Nothing to emit at all (e.g. a zero-length resident sample).
            self.ended = true;
        }
        let second = self.pull_frame();
        self.next_valid = second.is_some();
        self.next = second.unwrap_or([0.0, 0.0]);
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Returns `None` once the feed is exhausted (resident sample past
    /// its last frame); a streamed feed never runs out here, it just
    /// substitutes silence on starvation.
    fn pull_frame(&mut self) -> Option<[f32; 2]> {
        match &mut self.feed {
            Feed::Resident {
                frames,
                channels,
                pos,
                loop_region,
            } => {
                if let Some((start, end)) = *loop_region {
                    if *pos >= end {
                        *pos = start;
                    }
                }
                let total_frames = frames.len() as u64 / (*channels).max(1) as u64;
                if *pos >= total_frames {
                    return None;
                }
                let idx = (*pos * (*channels).max(1) as u64) as usize;
                let l = frames[idx];
                let r = if *channels >= 2 { frames[idx + 1] } else { l };
                *pos += 1;
                Some([l, r])
            }
            Feed::Streamed {
                consumer,
                channels,
                shared,
            } => {
                let wanted = (*channels).max(1) as usize;
                let mut raw = [0f32; 2];
                let got = consumer.pop_slice(&mut raw[..wanted]);
                if got < wanted {
                    // Starvation: the worker hasn't kept up. Report it
                    // and substitute silence for this frame rather than
                    // blocking (spec §4.3 guarantee 1 & 2).
                    shared.report_starved_read();
                    return Some([0.0, 0.0]);
                }
                let l = raw[0];
                let r = if wanted >= 2 { raw[1] } else { l };
                Some([l, r])
            }
        }
    }

    /// Produce the next interpolated stereo sample at pitch `ratio`
    /// (1.0 = unpitched). Returns `(sample, just_ended)`; once ended,
    /// every subsequent call returns silence. The last real frame is
    /// always emitted before `ended` latches — end-of-sample is judged
    /// from the emitted (`cur`) position, not the look-ahead (`next`).
    pub fn next_sample(&mut self, ratio: f32) -> ([f32; 2], bool) {
        if self.ended {
            return ([0.0, 0.0], true);
        }
        let out = [
            self.cur[0] + (self.next[0] - self.cur[0]) * self.frac,
            self.cur[1] + (self.next[1] - self.cur[1]) * self.frac,
        ];
        self.frac += ratio.max(0.0);
        while self.frac >= 1.0 {
            self.frac -= 1.0;
            if !self.next_valid {
                // `cur` was the last real frame and we've just emitted
                // it; latch `ended` for the call after this one.
                self.ended = true;
                break;
            }
            self.cur = self.next;
            let pulled = self.pull_frame();
            self.next_valid = pulled.is_some();
            self.next = pulled.unwrap_or([0.0, 0.0]);
        }
        (out, false)
    }
}
