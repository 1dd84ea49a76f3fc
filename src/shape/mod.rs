//! Token-shape chunking: beam-pruned decoder plus its trainer.

mod chunker;
mod decoder;

pub use chunker::{TokenShapeChunker, TrainTokenShapeChunker};
pub use decoder::TokenShapeDecoder;
