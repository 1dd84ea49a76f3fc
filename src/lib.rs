//! Statistical span extraction ("chunking") over text.
//!
//! Given unstructured text, the engine identifies labeled,
//! non-overlapping spans using frequency-based sequence models:
//!
//! - [`chunk`]: chunk and chunking value types;
//! - [`codec`]: BIO/IO conversion between chunkings and tag sequences,
//!   plus lattice-driven n-best chunk extraction;
//! - [`estimator`]: a trie-compressed, Witten-Bell-smoothed backoff
//!   estimator over token and tag contexts;
//! - [`shape`]: a beam-pruned approximate-Viterbi chunker over the
//!   compiled estimator;
//! - [`hmm`]: an HMM chunker with character-LM emissions, forward/backward
//!   marginal lattices and best-first n-best search;
//! - [`rescore`]: character-LM rescoring of a base chunker's candidates.
//!
//! Tokenization and token categorization are consumed as capabilities
//! ([`tokenizer`]); small default implementations are provided.
//!
//! Scores are base-2 log probabilities on public chunking/chunk results
//! (the rescorer's per-chunk confidence estimates are plain conditional
//! probabilities); lattices work in natural logs internally.

pub mod chunk;
pub mod chunker;
pub mod codec;
pub mod error;
pub mod estimator;
pub mod hmm;
pub mod lm;
pub mod rescore;
pub mod shape;
pub mod tagging;
pub mod tokenizer;

pub mod util;

mod trace;

pub use chunk::{Chunk, Chunking};
pub use chunker::{Chunker, ConfidenceChunker, NBestChunker, ScoredChunking};
pub use codec::{BioTagChunkCodec, IoTagChunkCodec, TagChunkCodec};
pub use error::{ChunkError, ModelError};
pub use estimator::{CompiledEstimator, TrainableEstimator};
pub use hmm::{CharLmHmmTrainer, HmmChunker, HmmDecoder, HmmModel, TagLattice};
pub use rescore::{CharLmRescoringChunker, CharLmRescoringTrainer};
pub use shape::{TokenShapeChunker, TrainTokenShapeChunker};
pub use tagging::{StringTagging, Tagging};
pub use tokenizer::{
    ShapeCategorizer, TokenCategorizer, Tokenizer, TokenizerFactory, WordTokenizerFactory,
};

#[cfg(feature = "trace")]
pub use trace::init_tracing;
