//! Asynchronous disk I/O for streamed sample playback (spec §4.3).
//!
//! The RT thread never touches a file descriptor: it either finds a
//! sample already resident in [`ResidentCache`] or asks [`DiskStreamer`]
//! to bind a stream and reads from the ring it gets back. All actual
//! disk I/O, including loop-point bookkeeping, happens on the disk
//! worker thread spawned by `DiskStreamer::spawn`.

mod cache;
mod loops;
mod metrics;
mod prefetch;
mod request;
mod shared_state;
mod thread;
mod varispeed;

pub use cache::{ResidentCache, ResidentSample};
pub use loops::{LoopAdvance, LoopCounter};
pub use metrics::{IOMetrics, IOMetricsSnapshot};
pub use prefetch::{stream_channel, StreamConsumer, StreamProducer};
pub use request::{ButlerCommand, LoopSpec, StreamRequest};
pub use shared_state::SharedStreamState;
pub use thread::{DiskStreamer, StreamAttachPoint};
pub use varispeed::PlayDirection;
