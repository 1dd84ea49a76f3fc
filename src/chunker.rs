//! Chunker capability traits.

use crate::chunk::{Chunk, Chunking};
use crate::error::ChunkError;

/// A chunking with a base-2 log score.
#[derive(Debug, Clone)]
pub struct ScoredChunking {
    pub chunking: Chunking,
    pub score: f64,
}

/// Produces one best chunking per input.
pub trait Chunker {
    fn chunk(&self, text: &str) -> Result<Chunking, ChunkError>;
}

/// Produces ranked alternative chunkings, best first.
pub trait NBestChunker: Chunker {
    /// Up to `max_n_best` chunkings in non-increasing score order.
    /// Fails with an invalid-argument error if `max_n_best < 1`.
    fn n_best(&self, text: &str, max_n_best: usize) -> Result<Vec<ScoredChunking>, ChunkError>;
}

/// Produces ranked individual chunks with confidence scores.
pub trait ConfidenceChunker {
    /// Up to `max_results` chunks in non-increasing score order.
    fn n_best_chunks(&self, text: &str, max_results: usize) -> Result<Vec<Chunk>, ChunkError>;
}
