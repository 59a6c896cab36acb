//! Lock-free primitives, the event model, and engine configuration shared
//! by the real-time sampler engine.
//!
//! Nothing in this crate spawns a thread or touches disk. It exists so the
//! RT-safety-critical building blocks (ring buffers, double-buffered
//! config, handle pools, the event type) can be tested in isolation from
//! `sampler-engine`'s voice/channel/engine machinery.

pub mod config;
pub mod error;
pub mod event;
pub mod lockfree;

pub use config::{EngineConfig, VoiceStealStrategy};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventPayload, SynthDestination};
pub use lockfree::double_buffer::DoubleBuffered;
pub use lockfree::pool::{Handle, HandlePool};
pub use lockfree::spsc::{EventRing, RingReader, RingWriter};
