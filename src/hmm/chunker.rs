//! HMM-backed chunker and its character-LM trainer.

use std::sync::Arc;

use crate::chunk::{Chunk, Chunking};
use crate::chunker::{Chunker, ConfidenceChunker, NBestChunker, ScoredChunking};
use crate::codec::{chunking_from_tag_run, BioTagChunkCodec, TagChunkCodec};
use crate::error::ChunkError;
use crate::tokenizer::{tokenize_with_offsets, TokenizerFactory};

use super::decoder::HmmDecoder;
use super::model::{HmmModel, HmmTrainer};

/// Chunker over a compiled HMM: first-best, n-best chunkings, and
/// per-chunk confidence via the marginal lattice.
pub struct HmmChunker {
    factory: Arc<dyn TokenizerFactory>,
    decoder: HmmDecoder,
}

impl HmmChunker {
    pub fn new(factory: Arc<dyn TokenizerFactory>, decoder: HmmDecoder) -> Self {
        Self { factory, decoder }
    }

    pub fn decoder(&self) -> &HmmDecoder {
        &self.decoder
    }

    pub fn tokenizer_factory(&self) -> &Arc<dyn TokenizerFactory> {
        &self.factory
    }
}

impl Chunker for HmmChunker {
    fn chunk(&self, text: &str) -> Result<Chunking, ChunkError> {
        let (tokens, _, starts, ends) = tokenize_with_offsets(self.factory.as_ref(), text);
        if tokens.is_empty() {
            return Ok(Chunking::new(text));
        }
        let tagging = self.decoder.tag(&tokens)?;
        chunking_from_tag_run(text, tagging.tags(), &starts, &ends)
    }
}

impl NBestChunker for HmmChunker {
    fn n_best(&self, text: &str, max_n_best: usize) -> Result<Vec<ScoredChunking>, ChunkError> {
        let (tokens, _, starts, ends) = tokenize_with_offsets(self.factory.as_ref(), text);
        let mut results = Vec::new();
        for scored in self.decoder.tag_n_best(&tokens, max_n_best)? {
            let chunking = chunking_from_tag_run(text, &scored.tags, &starts, &ends)?;
            results.push(ScoredChunking {
                chunking,
                score: scored.score,
            });
        }
        Ok(results)
    }
}

impl ConfidenceChunker for HmmChunker {
    fn n_best_chunks(&self, text: &str, max_results: usize) -> Result<Vec<Chunk>, ChunkError> {
        let (tokens, _, starts, ends) = tokenize_with_offsets(self.factory.as_ref(), text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let lattice = self.decoder.tag_marginal(&tokens);
        let codec = BioTagChunkCodec::new(Some(self.factory.clone()), false);
        let iter = codec.n_best_chunks(&lattice, &starts, &ends, max_results)?;
        Ok(iter.collect())
    }
}

/// Trains an HMM chunker from chunkings: the codec turns each chunking
/// into a BIO tag sequence, which feeds the HMM's transition counts and
/// per-tag character LMs.
pub struct CharLmHmmTrainer {
    factory: Arc<dyn TokenizerFactory>,
    codec: BioTagChunkCodec,
    trainer: HmmTrainer,
}

impl CharLmHmmTrainer {
    pub fn new(factory: Arc<dyn TokenizerFactory>) -> Self {
        Self::with_trainer(factory, HmmTrainer::new(true))
    }

    pub fn with_trainer(factory: Arc<dyn TokenizerFactory>, trainer: HmmTrainer) -> Self {
        let codec = BioTagChunkCodec::new(Some(factory.clone()), false);
        Self {
            factory,
            codec,
            trainer,
        }
    }

    pub fn train(&mut self, chunking: &Chunking) -> Result<(), ChunkError> {
        let tagging = self.codec.to_tagging(chunking)?;
        self.trainer.train(tagging.tokens(), tagging.tags())
    }

    /// Train a dictionary entry: the phrase tokenizes to a begin tag
    /// followed by interior tags of the given type.
    pub fn train_dictionary(&mut self, text: &str, kind: &str) -> Result<(), ChunkError> {
        let (tokens, _, _, _) = tokenize_with_offsets(self.factory.as_ref(), text);
        if tokens.is_empty() {
            return Err(ChunkError::EmptyChunk(format!(
                "dictionary entry {text:?} tokenizes to nothing"
            )));
        }
        let mut tags = vec![crate::codec::tags::to_begin_tag(kind)];
        for _ in 1..tokens.len() {
            tags.push(crate::codec::tags::to_inner_tag(kind));
        }
        self.trainer.train(&tokens, &tags)
    }

    pub fn compile_model(&self) -> HmmModel {
        self.trainer.compile()
    }

    pub fn compile(&self) -> HmmChunker {
        let model = Arc::new(self.compile_model());
        HmmChunker::new(self.factory.clone(), HmmDecoder::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordTokenizerFactory;

    fn person(text: &str, start: usize, end: usize) -> Chunking {
        let mut chunking = Chunking::new(text);
        chunking
            .add(Chunk::with_type(start, end, "PERSON").unwrap())
            .unwrap();
        chunking
    }

    fn trained() -> HmmChunker {
        let mut trainer = CharLmHmmTrainer::new(Arc::new(WordTokenizerFactory));
        for _ in 0..6 {
            trainer.train(&person("John smith went home", 0, 10)).unwrap();
            trainer.train(&person("Mary jones went home", 0, 10)).unwrap();
            trainer.train(&Chunking::new("the dog ran home")).unwrap();
        }
        trainer.compile()
    }

    #[test]
    fn test_chunk_recovers_person() {
        let chunker = trained();
        let chunking = chunker.chunk("John smith went home").unwrap();
        let chunks = chunking.sorted_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind(), "PERSON");
        assert_eq!((chunks[0].start(), chunks[0].end()), (0, 10));
    }

    #[test]
    fn test_chunk_empty_text() {
        let chunker = trained();
        assert!(chunker.chunk("").unwrap().chunks().is_empty());
    }

    #[test]
    fn test_n_best_first_matches_chunk() {
        let chunker = trained();
        let best = chunker.chunk("John smith went home").unwrap();
        let n_best = chunker.n_best("John smith went home", 4).unwrap();
        assert!(!n_best.is_empty());
        assert_eq!(n_best[0].chunking, best);
        for pair in n_best.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_n_best_zero_rejected() {
        let chunker = trained();
        assert!(matches!(
            chunker.n_best("John", 0),
            Err(ChunkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_n_best_chunks_ranked_and_bounded() {
        let chunker = trained();
        let chunks = chunker.n_best_chunks("John smith went home", 5).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 5);
        for pair in chunks.windows(2) {
            assert!(pair[0].score() >= pair[1].score());
        }
        // The most confident chunk is the trained PERSON span.
        assert_eq!(chunks[0].kind(), "PERSON");
        assert_eq!((chunks[0].start(), chunks[0].end()), (0, 10));
    }

    #[test]
    fn test_train_dictionary_biases_decoding() {
        let mut trainer = CharLmHmmTrainer::new(Arc::new(WordTokenizerFactory));
        for _ in 0..6 {
            trainer.train(&person("John smith went home", 0, 10)).unwrap();
            trainer.train(&Chunking::new("the dog ran home")).unwrap();
            trainer.train_dictionary("Acme Corp", "COMPANY").unwrap();
        }
        let chunker = trainer.compile();
        let chunking = chunker.chunk("Acme Corp went home").unwrap();
        let kinds: Vec<String> = chunking
            .sorted_chunks()
            .iter()
            .map(|c| c.kind().to_string())
            .collect();
        assert!(kinds.contains(&"COMPANY".to_string()), "got {kinds:?}");
    }

    #[test]
    fn test_unseen_person_shape_generalizes() {
        // Character LMs carry the capitalization/shape signal to names
        // never seen in training.
        let chunker = trained();
        let chunking = chunker.chunk("Johk smitt went home").unwrap();
        let chunks = chunking.sorted_chunks();
        assert_eq!(chunks.len(), 1, "expected a PERSON chunk");
        assert_eq!(chunks[0].kind(), "PERSON");
    }
}
