//! Trainable trie-backed backoff estimator and its compiled form.

mod compiled;
mod node;
mod symbol;
mod train;
mod trie;

pub use compiled::CompiledEstimator;
pub use symbol::SymbolTable;
pub use train::TrainableEstimator;
