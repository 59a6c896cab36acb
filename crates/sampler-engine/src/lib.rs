//! Streaming polyphonic sampler engine (spec §2): voice allocation with
//! stealing, disk-streamed sample playback, the MIDI→voice dispatch
//! pipeline, and the lock-free coordination between the real-time
//! render path, the disk I/O path, and the non-real-time control plane.
//!
//! `sampler-kernel` supplies the thread-free primitives (ring buffers,
//! double-buffered config, the event type); everything in this crate
//! has an opinion about voices, channels, disk streaming, or instrument
//! lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use sampler_engine::Sampler;
//! use sampler_kernel::EngineConfig;
//!
//! let sampler = Sampler::new();
//! let (engine, channel) = sampler.add_channel(&device, EngineConfig::default())?;
//! channel.send_note_on(60, 100, None);
//! engine.render(512, &mut outputs);
//! ```

pub mod audio_device;
pub mod channel;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod metrics;
pub mod midi_port;
pub mod path_encoding;
pub mod resource_manager;
pub mod sample_source;
pub mod voice;

pub(crate) mod butler;
mod sampler;

pub use audio_device::{AudioOutputDevice, ChannelBuffers};
pub use channel::{ChannelKeyState, EngineChannel, MidiKeyInfo};
pub use engine::{Engine, EngineOutputBuffers, ProgramChangeHandler};
pub use error::{Error, Result};
pub use instrument::{InstrumentSource, OffMode, Region, RegionQueryContext, TriggerKind};
pub use metrics::EngineMetrics;
pub use midi_port::{MidiPortRouter, VirtualMidiListener, MIDI_CHANNEL_ALL};
pub use resource_manager::{
    AvailabilityMode, InstrumentKey, InstrumentResourceManager, SwapListener,
};
pub use sample_source::SampleSource;
pub use sampler::Sampler;
pub use voice::{RenderContext, TriggerParams, Voice, VoiceState, VoiceType};

pub use butler::{
    DiskStreamer, IOMetrics, IOMetricsSnapshot, LoopAdvance, LoopCounter, PlayDirection,
    ResidentCache, ResidentSample, StreamAttachPoint,
};
