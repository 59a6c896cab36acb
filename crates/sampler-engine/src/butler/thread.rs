//! The dedicated disk-I/O worker (spec §4.3, §5): one per `Engine`,
//! blocking file I/O confined entirely to this thread. Receives
//! `Bind`/`Release` commands over a bounded `crossbeam_channel` (the
//! RT side only ever `try_send`s, so it never blocks here) and refills
//! each bound stream's ring, prioritizing whichever has the least
//! head-room — the fewest frames buffered ahead of the voice reading
//! it (spec: "prioritises rings with the least head-room").

use super::loops::LoopCounter;
use super::metrics::IOMetrics;
use super::prefetch::{stream_channel, StreamConsumer, StreamProducer};
use super::request::{ButlerCommand, LoopSpec, StreamRequest};
use super::shared_state::SharedStreamState;
use super::varispeed::PlayDirection;
use crate::sample_source::SampleSource;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;

/// How many frames the worker tries to push into a ring per refill.
const REFILL_CHUNK_FRAMES: usize = 2048;
/// Below this fraction of capacity filled, a refill pass is counted as
/// a low-buffer event (spec §7 metric).
const LOW_BUFFER_FRACTION: f32 = 0.1;

struct ActiveStream {
    sample: Arc<dyn SampleSource>,
    channels: u16,
    position: u64,
    direction: PlayDirection,
    loop_spec: Option<LoopSpec>,
    loop_counter: LoopCounter,
    producer: StreamProducer,
    shared: Arc<SharedStreamState>,
    ended: bool,
}

impl From<StreamRequest> for ActiveStream {
    fn from(request: StreamRequest) -> Self {
        Self {
            sample: request.sample,
            channels: request.channels,
            position: request.start_offset,
            direction: PlayDirection::Forward,
            loop_spec: request.loop_spec,
            loop_counter: LoopCounter::new(),
            producer: request.producer,
            shared: request.shared,
            ended: false,
        }
    }
}

/// Owns the disk worker thread and the command channel into it. One
/// instance per `Engine` (spec §4.7: "spawning the disk thread" on
/// first channel acquire).
pub struct DiskStreamer {
    command_tx: Sender<ButlerCommand>,
    metrics: Arc<IOMetrics>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DiskStreamer {
    /// Spawn the worker thread. `voice_pool_capacity` bounds the
    /// number of concurrently bound streams (one per live voice);
    /// `ring_capacity_frames` sizes each per-voice ring.
    pub fn spawn(voice_pool_capacity: usize, ring_capacity_frames: usize) -> (Self, Vec<StreamAttachPoint>) {
        let (command_tx, command_rx) = bounded(voice_pool_capacity * 2 + 4);
        let metrics = Arc::new(IOMetrics::new());

        let mut attach_points = Vec::with_capacity(voice_pool_capacity);
        let mut worker_slots: Vec<Option<ActiveStream>> = Vec::with_capacity(voice_pool_capacity);
        for _ in 0..voice_pool_capacity {
            attach_points.push(StreamAttachPoint {
                ring_capacity_frames,
            });
            worker_slots.push(None);
        }

        let worker_metrics = metrics.clone();
        let thread_handle = thread::Builder::new()
            .name("sampler-butler".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                run_worker(command_rx, worker_slots, worker_metrics);
            })
            .expect("failed to spawn disk worker thread");

        (
            Self {
                command_tx,
                metrics,
                thread_handle: Some(thread_handle),
            },
            attach_points,
        )
    }

    /// Request a stream bind (spec §4.3: "a voice requests a stream
    /// bound to (sample, start_offset, loop_mode)"). Non-blocking: a
    /// full command channel drops the request and the caller's voice
    /// falls back to silence until retried, per spec §7's
    /// transient-RT handling.
    pub fn bind(&self, request: StreamRequest) -> bool {
        self.command_tx.try_send(ButlerCommand::Bind(request)).is_ok()
    }

    pub fn release(&self, voice_slot: usize) {
        let _ = self.command_tx.try_send(ButlerCommand::Release(voice_slot));
    }

    pub fn metrics(&self) -> &IOMetrics {
        &self.metrics
    }

    /// Stop the worker, draining its request queue and freeing every
    /// active stream (spec §4.3: "terminates cleanly on engine
    /// shutdown by draining the request queue and freeing all active
    /// streams").
    pub fn shutdown(&mut self) {
        let _ = self.command_tx.try_send(ButlerCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiskStreamer {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.shutdown();
        }
    }
}

/// Per-slot ring sizing, handed back from `spawn` so `bind` calls can
/// build a fresh producer/consumer pair without round-tripping through
/// the worker thread.
#[derive(Clone, Copy)]
pub struct StreamAttachPoint {
    ring_capacity_frames: usize,
}

impl StreamAttachPoint {
    pub fn new_ring(&self, channels: u16) -> (StreamProducer, StreamConsumer) {
        stream_channel(self.ring_capacity_frames, channels)
    }
}

fn run_worker(
    command_rx: Receiver<ButlerCommand>,
    mut slots: Vec<Option<ActiveStream>>,
    metrics: Arc<IOMetrics>,
) {
    loop {
        let mut shutting_down = false;
        // Drain every pending command before doing I/O this pass.
        loop {
            match command_rx.try_recv() {
                Ok(ButlerCommand::Bind(request)) => {
                    let slot = request.voice_slot;
                    slots[slot] = Some(ActiveStream::from(request));
                }
                Ok(ButlerCommand::Release(slot)) => {
                    slots[slot] = None;
                }
                Ok(ButlerCommand::Shutdown) => {
                    shutting_down = true;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    shutting_down = true;
                    break;
                }
            }
        }

        if shutting_down {
            slots.clear();
            return;
        }

        // The stream with the most vacant ring space has the least
        // audio buffered ahead of its voice, so it is refilled first.
        let least_headroom = slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| !s.ended).map(|s| (i, s.producer.vacant_len())))
            .max_by_key(|(_, vacant)| *vacant)
            .map(|(i, _)| i);

        match least_headroom {
            Some(index) => {
                refill_one(&mut slots[index], &metrics);
            }
            None => {
                // Nothing to do; wait for the next command rather than
                // spinning.
                if let Ok(cmd) = command_rx.recv_timeout(Duration::from_millis(20)) {
                    match cmd {
                        ButlerCommand::Release(slot) => slots[slot] = None,
                        ButlerCommand::Shutdown => {
                            slots.clear();
                            return;
                        }
                        ButlerCommand::Bind(_) => {}
                    }
                }
            }
        }
    }
}

fn refill_one(slot: &mut Option<ActiveStream>, metrics: &IOMetrics) {
    let Some(stream) = slot else { return };
    if stream.ended {
        return;
    }

    let vacant_frames = stream.producer.vacant_len() / stream.channels.max(1) as usize;
    let frames_to_read = vacant_frames.min(REFILL_CHUNK_FRAMES);
    if frames_to_read == 0 {
        return;
    }

    let mut scratch = vec![0f32; frames_to_read * stream.channels.max(1) as usize];
    let _ = stream.sample.set_position(stream.position);

    let frames_read = match &stream.loop_spec {
        Some(spec) => stream
            .sample
            .read_and_loop(&mut scratch, spec.start, spec.end)
            .map(|(n, _)| n)
            .unwrap_or(0),
        None => stream.sample.read(&mut scratch).unwrap_or(0),
    };

    if frames_read == 0 {
        stream.ended = true;
        return;
    }

    let channels = stream.channels.max(1) as usize;
    let written = stream.producer.push_slice(&scratch[..frames_read * channels]);
    metrics.record_read((written * std::mem::size_of::<f32>()) as u64);

    stream.position += frames_read as u64;

    if let Some(spec) = stream.loop_spec {
        let advance = stream.loop_counter.advance(stream.position, stream.direction, &spec);
        stream.position = advance.position;
        stream.direction = advance.direction;
        if advance.exhausted {
            stream.loop_spec = None;
        }
    }

    let fraction = stream.producer.vacant_len() as f32 / stream.producer.capacity().max(1) as f32;
    stream.shared.set_fill(stream.producer.vacant_len(), stream.producer.capacity());
    if 1.0 - fraction < LOW_BUFFER_FRACTION {
        metrics.record_low_buffer();
    }
}
