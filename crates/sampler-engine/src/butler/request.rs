//! Request types exchanged between the RT thread and the disk worker
//! (spec §4.3 "worker protocol").

use crate::butler::prefetch::StreamProducer;
use crate::butler::shared_state::SharedStreamState;
use crate::sample_source::SampleSource;
use std::sync::Arc;

/// Loop configuration for a bound stream: start/end frame offsets, an
/// optional play-count limit, and optional reverse direction (spec
/// §4.3: "loop points (including play-count-limited loops with reverse
/// direction)").
#[derive(Debug, Clone, Copy)]
pub struct LoopSpec {
    pub start: u64,
    pub end: u64,
    /// `None` loops forever; `Some(n)` stops looping after `n` passes
    /// through the loop region.
    pub max_plays: Option<u32>,
    pub reverse: bool,
}

/// A voice's request to stream from `sample`, starting at
/// `start_offset`, honoring `loop_spec` if present (spec §4.3: "a voice
/// requests a stream bound to (sample, start_offset, loop_mode)").
///
/// The producer half of the ring and the shared fill-level state are
/// built by the caller (via `StreamAttachPoint::new_ring`) and handed
/// over here; the consumer half stays with the voice.
pub struct StreamRequest {
    pub voice_slot: usize,
    pub sample: Arc<dyn SampleSource>,
    pub channels: u16,
    pub start_offset: u64,
    pub loop_spec: Option<LoopSpec>,
    pub producer: StreamProducer,
    pub shared: Arc<SharedStreamState>,
}

/// Commands sent from the RT thread to the disk worker. Delivered over
/// a bounded `crossbeam_channel` so `try_send` never blocks the caller
/// (spec §5: "the RT thread... must never block").
pub enum ButlerCommand {
    Bind(StreamRequest),
    /// The voice at this slot was freed; stop refilling its ring and
    /// drop the sample reference.
    Release(usize),
    Shutdown,
}
