//! HMM chunking: trainable model, decoder, marginal lattice and n-best
//! extraction.

mod chunker;
mod decoder;
mod lattice;
mod model;

pub use chunker::{CharLmHmmTrainer, HmmChunker};
pub use decoder::{HmmDecoder, NBestTaggingIter, ScoredTagging};
pub use lattice::TagLattice;
pub use model::{HmmModel, HmmTrainer};
