//! Error taxonomy (spec §7). Only control-plane-invalid and fatal-init
//! failures surface as `Err`; transient RT conditions (pool/queue
//! exhaustion, disk starvation) are reported through metrics and never
//! propagate here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("sample not found: {0}")]
    SampleNotFound(String),

    #[error("MIDI channel {0} is out of range")]
    InvalidChannel(u8),

    #[error("audio device {0} not found")]
    DeviceNotFound(String),

    #[error("instrument {0} is already loaded on this channel")]
    DuplicateInstrument(String),

    #[error("voice pool exhausted")]
    VoicePoolExhausted,

    #[error("failed to spawn disk worker thread")]
    DiskThreadSpawnFailed,

    #[error("malformed sysex message: {0}")]
    MalformedSysex(String),

    #[error("engine is disabled")]
    EngineDisabled,
}

pub type Result<T> = std::result::Result<T, Error>;
