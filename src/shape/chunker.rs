//! First-best chunker over the token-shape decoder, and its trainer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::chunk::Chunking;
use crate::codec::{chunking_from_tag_run, BioTagChunkCodec, TagChunkCodec};
use crate::error::ChunkError;
use crate::estimator::TrainableEstimator;
use crate::tokenizer::{TokenCategorizer, TokenizerFactory};

use super::decoder::TokenShapeDecoder;

const DEFAULT_LOG2_BEAM: f64 = 1000.0;
const DEFAULT_KNOWN_MIN_TOKEN_COUNT: u32 = 8;
const DEFAULT_MIN_TOKEN_COUNT: u32 = 1;
const DEFAULT_MIN_TAG_COUNT: u32 = 1;

/// Chunker producing one best chunking per input via the beam-pruned
/// decoder.
pub struct TokenShapeChunker {
    factory: Arc<dyn TokenizerFactory>,
    decoder: TokenShapeDecoder,
}

impl TokenShapeChunker {
    pub fn new(factory: Arc<dyn TokenizerFactory>, decoder: TokenShapeDecoder) -> Self {
        Self { factory, decoder }
    }

    /// Replace the decoder's beam width; must be positive and finite.
    pub fn set_log2_beam(&mut self, beam: f64) -> Result<(), ChunkError> {
        if beam.is_nan() || beam.is_infinite() || beam <= 0.0 {
            return Err(ChunkError::InvalidArgument(format!(
                "beam width must be positive and finite, was {beam}"
            )));
        }
        self.decoder.set_log2_beam(beam);
        Ok(())
    }

    pub fn chunk(&self, text: &str) -> Result<Chunking, ChunkError> {
        let (tokens, _, token_starts, token_ends) =
            crate::tokenizer::tokenize_with_offsets(self.factory.as_ref(), text);
        if tokens.is_empty() {
            return Ok(Chunking::new(text));
        }
        let tags = self.decoder.decode_tags(&tokens);
        chunking_from_tag_run(text, &tags, &token_starts, &token_ends)
    }
}

/// Accumulates tagged token sequences from chunkings and compiles them
/// into a `TokenShapeChunker`.
///
/// Tokens seen fewer than `known_min_token_count` times are retrained as
/// their shape categories, so the compiled model carries usable statistics
/// for out-of-vocabulary tokens.
pub struct TrainTokenShapeChunker {
    categorizer: Arc<dyn TokenCategorizer>,
    factory: Arc<dyn TokenizerFactory>,
    known_min_token_count: u32,
    min_token_count: u32,
    min_tag_count: u32,
    tokens: Vec<String>,
    tags: Vec<String>,
}

impl TrainTokenShapeChunker {
    pub fn new(
        categorizer: Arc<dyn TokenCategorizer>,
        factory: Arc<dyn TokenizerFactory>,
    ) -> Self {
        Self::with_counts(
            categorizer,
            factory,
            DEFAULT_KNOWN_MIN_TOKEN_COUNT,
            DEFAULT_MIN_TOKEN_COUNT,
            DEFAULT_MIN_TAG_COUNT,
        )
    }

    pub fn with_counts(
        categorizer: Arc<dyn TokenCategorizer>,
        factory: Arc<dyn TokenizerFactory>,
        known_min_token_count: u32,
        min_token_count: u32,
        min_tag_count: u32,
    ) -> Self {
        Self {
            categorizer,
            factory,
            known_min_token_count,
            min_token_count,
            min_tag_count,
            tokens: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Add a training chunking, encoded through the BIO codec with this
    /// trainer's tokenizer.
    pub fn handle(&mut self, chunking: &Chunking) -> Result<(), ChunkError> {
        let codec = BioTagChunkCodec::new(Some(self.factory.clone()), false);
        let tagging = codec.to_tagging(chunking)?;
        self.tokens.extend_from_slice(tagging.tokens());
        self.tags.extend_from_slice(tagging.tags());
        Ok(())
    }

    /// Train the estimator on the accumulated sequences (raw, then with
    /// rare tokens categorized), prune, smooth and compile.
    pub fn compile(&self) -> Result<TokenShapeChunker, ChunkError> {
        let mut estimator = TrainableEstimator::new(self.categorizer.clone());
        estimator.handle(&self.tokens, &self.tags)?;

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in &self.tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        let categorized: Vec<String> = self
            .tokens
            .iter()
            .map(|token| {
                if counts[token.as_str()] < self.known_min_token_count {
                    self.categorizer.categorize(token)
                } else {
                    token.clone()
                }
            })
            .collect();
        estimator.handle(&categorized, &self.tags)?;

        estimator.prune(self.min_tag_count, self.min_token_count);
        estimator.smooth_tags(1);
        debug!(
            tokens = self.tokens.len(),
            "compiling token-shape chunker"
        );
        let compiled = Arc::new(estimator.compile());
        Ok(TokenShapeChunker::new(
            self.factory.clone(),
            TokenShapeDecoder::new(compiled, DEFAULT_LOG2_BEAM),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::tokenizer::{ShapeCategorizer, WordTokenizerFactory};

    fn trainer() -> TrainTokenShapeChunker {
        // known_min_token_count of 16 categorizes the rarer half of the
        // fixture vocabulary, so shape classes carry real statistics.
        TrainTokenShapeChunker::with_counts(
            Arc::new(ShapeCategorizer),
            Arc::new(WordTokenizerFactory),
            16,
            1,
            1,
        )
    }

    fn person_chunking(text: &str, start: usize, end: usize) -> Chunking {
        let mut chunking = Chunking::new(text);
        chunking
            .add(Chunk::with_type(start, end, "PERSON").unwrap())
            .unwrap();
        chunking
    }

    fn trained_chunker() -> TokenShapeChunker {
        let mut trainer = trainer();
        for _ in 0..8 {
            trainer
                .handle(&person_chunking("John smith went home", 0, 10))
                .unwrap();
            trainer
                .handle(&person_chunking("Mary jones went home", 0, 10))
                .unwrap();
            trainer.handle(&Chunking::new("the dog ran home")).unwrap();
        }
        trainer.compile().unwrap()
    }

    #[test]
    fn test_chunk_recovers_trained_entity() {
        let chunker = trained_chunker();
        let chunking = chunker.chunk("John smith went home").unwrap();
        let chunks = chunking.sorted_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind(), "PERSON");
        assert_eq!((chunks[0].start(), chunks[0].end()), (0, 10));
    }

    #[test]
    fn test_chunk_empty_input() {
        let chunker = trained_chunker();
        let chunking = chunker.chunk("").unwrap();
        assert!(chunking.chunks().is_empty());
    }

    #[test]
    fn test_chunk_no_entities() {
        let chunker = trained_chunker();
        let chunking = chunker.chunk("the dog ran home").unwrap();
        assert!(chunking.chunks().is_empty());
    }

    #[test]
    fn test_chunk_offsets_respect_leading_whitespace() {
        let chunker = trained_chunker();
        let chunking = chunker.chunk("  John smith went home").unwrap();
        let chunks = chunking.sorted_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start(), chunks[0].end()), (2, 12));
        assert_eq!(chunking.span_of(&chunks[0]), "John smith");
    }

    #[test]
    fn test_set_log2_beam_validation() {
        let mut chunker = trained_chunker();
        assert!(chunker.set_log2_beam(8.0).is_ok());
        assert!(chunker.set_log2_beam(0.0).is_err());
        assert!(chunker.set_log2_beam(-2.0).is_err());
        assert!(chunker.set_log2_beam(f64::NAN).is_err());
    }

    #[test]
    fn test_unseen_name_shaped_like_training_data() {
        // "Kate smith": "Kate" is unseen, but its shape matches trained
        // capitalized first names followed by a known surname.
        let chunker = trained_chunker();
        let chunking = chunker.chunk("Kate smith went home").unwrap();
        let chunks = chunking.sorted_chunks();
        assert_eq!(chunks.len(), 1, "expected one PERSON chunk");
        assert_eq!(chunks[0].kind(), "PERSON");
    }
}
