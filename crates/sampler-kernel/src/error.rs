//! Error types for sampler-kernel.

use thiserror::Error;

/// Error type for kernel-level operations (config validation, event
/// construction, lock-free primitives).
///
/// Nothing in this crate's RT path returns `Err` — these are
/// control-plane/construction-time failures only, per the engine's
/// error taxonomy (Transient-RT failures never throw; they're metrics).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    #[error("handle {0:?} is stale or was never allocated")]
    StaleHandle(u64),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
