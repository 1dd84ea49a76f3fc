use std::io;

/// Unified error type for chunk, tagging and codec operations.
///
/// Every variant carries a description of the first violation found, so
/// callers can surface it without re-running the check that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid span: start={start} end={end}")]
    InvalidSpan { start: usize, end: usize },

    #[error("illegal tag sequence: {0}")]
    IllegalTagSequence(String),

    #[error("inconsistent input: {0}")]
    InconsistentInput(String),

    #[error("chunk spans no tokens: {0}")]
    EmptyChunk(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("misaligned input: {0}")]
    MisalignedInput(String),
}

/// Error type for compiled-model binary I/O.
///
/// Covers loading/saving compiled estimators (SPEM) and compiled HMM
/// models (SPHM). A model that fails any structural check on load is
/// rejected as a whole; there is no partial recovery.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected SPEM or SPHM)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error("corrupt model: {0}")]
    Corrupt(String),
}
