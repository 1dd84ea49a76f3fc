//! Character-LM rescoring over a base n-best chunker.
//!
//! Candidates from the base chunker are rescored as: boundary-model mass
//! for the text between chunks (conditioned on sentinel characters that
//! encode the surrounding chunk types) plus a per-type sequence-model
//! mass for each chunk's own span. Sentinels keep n-gram contexts from
//! leaking across chunk boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::chunk::{text_order, Chunk, Chunking};
use crate::chunker::{Chunker, ConfidenceChunker, NBestChunker, ScoredChunking};
use crate::error::ChunkError;
use crate::hmm::{CharLmHmmTrainer, HmmChunker, HmmTrainer};
use crate::lm::{NGramBoundaryLm, NGramProcessLm};
use crate::tokenizer::TokenizerFactory;
use crate::util::BoundedPriorityQueue;

const UNKNOWN_TYPE_CHAR: char = '\u{FFFF}';
const BOS_CHAR: char = '\u{FFFE}';
const EOS_CHAR: char = '\u{FFFD}';
const FIRST_CODE_CHAR: char = '\u{FFFC}';

/// Per-char cost charged for a chunk whose type has no model; keeps a
/// candidate with an unknown type rankable instead of crashing.
const MISSING_TYPE_LOG2: f64 = -16.0;

/// Rescoring chunker over any base n-best chunker.
pub struct CharLmRescoringChunker<B: NBestChunker> {
    base: B,
    num_rescored: usize,
    out_lm: NGramProcessLm,
    type_lms: HashMap<String, NGramBoundaryLm>,
    type_to_char: HashMap<String, char>,
}

impl<B: NBestChunker> CharLmRescoringChunker<B> {
    pub fn new(
        base: B,
        num_rescored: usize,
        out_lm: NGramProcessLm,
        type_lms: HashMap<String, NGramBoundaryLm>,
        type_to_char: HashMap<String, char>,
    ) -> Self {
        Self {
            base,
            num_rescored,
            out_lm,
            type_lms,
            type_to_char,
        }
    }

    pub fn base_chunker(&self) -> &B {
        &self.base
    }

    pub fn num_rescored(&self) -> usize {
        self.num_rescored
    }

    pub fn set_num_rescored(&mut self, num_rescored: usize) {
        self.num_rescored = num_rescored;
    }

    fn type_char(&self, kind: &str) -> char {
        self.type_to_char
            .get(kind)
            .copied()
            .unwrap_or(UNKNOWN_TYPE_CHAR)
    }

    fn out_estimate(&self, text: &str, prev_char: char, next_char: char) -> f64 {
        let mut wrapped = String::with_capacity(text.len() + 8);
        wrapped.push(prev_char);
        wrapped.push_str(text);
        wrapped.push(next_char);
        let prefix: String = prev_char.to_string();
        self.out_lm.log2_estimate(&wrapped) - self.out_lm.log2_estimate(&prefix)
    }

    fn type_estimate(&self, kind: &str, text: &str) -> f64 {
        match self.type_lms.get(kind) {
            Some(lm) => lm.log2_estimate(text),
            None => {
                warn!(kind, "no language model for chunk type");
                MISSING_TYPE_LOG2 * text.chars().count() as f64
            }
        }
    }

    /// log2 score of a chunking under the boundary and type models.
    pub fn rescore(&self, chunking: &Chunking) -> f64 {
        let chars = chunking.chars();
        let mut chunks = chunking.chunks().to_vec();
        chunks.sort_by(text_order);
        let mut log2 = 0.0;
        let mut pos = 0usize;
        let mut prev_char = BOS_CHAR;
        for chunk in &chunks {
            let gap: String = chars[pos..chunk.start()].iter().collect();
            let tag_char = self.type_char(chunk.kind());
            log2 += self.out_estimate(&gap, prev_char, tag_char);
            let span: String = chars[chunk.start()..chunk.end()].iter().collect();
            log2 += self.type_estimate(chunk.kind(), &span);
            pos = chunk.end();
            prev_char = tag_char;
        }
        let tail: String = chars[pos..].iter().collect();
        log2 += self.out_estimate(&tail, prev_char, EOS_CHAR);
        log2
    }
}

impl<B: NBestChunker> Chunker for CharLmRescoringChunker<B> {
    fn chunk(&self, text: &str) -> Result<Chunking, ChunkError> {
        let candidates = self.base.n_best(text, self.num_rescored.max(1))?;
        let mut best: Option<(f64, Chunking)> = None;
        for candidate in candidates {
            let score = self.rescore(&candidate.chunking);
            match &best {
                Some((best_score, _)) if *best_score >= score => {}
                _ => best = Some((score, candidate.chunking)),
            }
        }
        match best {
            Some((_, chunking)) => Ok(chunking),
            None => Ok(Chunking::new(text)),
        }
    }
}

impl<B: NBestChunker> NBestChunker for CharLmRescoringChunker<B> {
    fn n_best(&self, text: &str, max_n_best: usize) -> Result<Vec<ScoredChunking>, ChunkError> {
        if max_n_best < 1 {
            return Err(ChunkError::InvalidArgument(format!(
                "max n-best must be at least 1, was {max_n_best}"
            )));
        }
        let candidates = self.base.n_best(text, self.num_rescored.max(1))?;
        let mut queue = BoundedPriorityQueue::new(max_n_best);
        for candidate in candidates {
            let score = self.rescore(&candidate.chunking);
            queue.offer(score, candidate.chunking);
        }
        Ok(queue
            .into_sorted_vec()
            .into_iter()
            .map(|(score, chunking)| ScoredChunking { chunking, score })
            .collect())
    }
}

impl<B: NBestChunker> ConfidenceChunker for CharLmRescoringChunker<B> {
    /// Per-chunk conditional estimate: each rescored candidate chunking
    /// contributes `2^score` mass to every chunk it contains; estimates
    /// are normalized by the total candidate mass. Scores on the returned
    /// chunks are plain conditional probabilities.
    fn n_best_chunks(&self, text: &str, max_results: usize) -> Result<Vec<Chunk>, ChunkError> {
        let candidates = self.n_best(text, self.num_rescored.max(1))?;
        let mut total_mass = 0.0f64;
        let mut chunk_mass: HashMap<Chunk, f64> = HashMap::new();
        for candidate in candidates {
            let mass = candidate.score.exp2();
            total_mass += mass;
            for chunk in candidate.chunking.chunks() {
                *chunk_mass.entry(chunk.unscored()).or_insert(0.0) += mass;
            }
        }
        let mut queue = BoundedPriorityQueue::new(max_results);
        for (chunk, mass) in chunk_mass {
            queue.offer(mass / total_mass, chunk);
        }
        Ok(queue
            .into_sorted_vec()
            .into_iter()
            .map(|(estimate, chunk)| chunk.rescored(estimate))
            .collect())
    }
}

/// Trains the base HMM chunker and the rescoring language models
/// together, then compiles the full rescoring chunker.
pub struct CharLmRescoringTrainer {
    base: CharLmHmmTrainer,
    num_rescored: usize,
    max_ngram: usize,
    num_chars: usize,
    lambda_factor: f64,
    out_lm: NGramProcessLm,
    type_lms: HashMap<String, NGramBoundaryLm>,
    type_to_char: HashMap<String, char>,
    next_code_char: char,
}

impl CharLmRescoringTrainer {
    pub fn new(
        factory: Arc<dyn TokenizerFactory>,
        num_rescored: usize,
        max_ngram: usize,
        num_chars: usize,
        lambda_factor: f64,
    ) -> Self {
        let base = CharLmHmmTrainer::with_trainer(
            factory,
            HmmTrainer::with_params(max_ngram, num_chars, lambda_factor, true),
        );
        Self {
            base,
            num_rescored,
            max_ngram,
            num_chars,
            lambda_factor,
            out_lm: NGramProcessLm::new(max_ngram, num_chars, lambda_factor),
            type_lms: HashMap::new(),
            type_to_char: HashMap::new(),
            next_code_char: FIRST_CODE_CHAR,
        }
    }

    fn create_type(&mut self, kind: &str) {
        if self.type_to_char.contains_key(kind) {
            return;
        }
        self.type_to_char
            .insert(kind.to_string(), self.next_code_char);
        self.next_code_char = char::from_u32(self.next_code_char as u32 - 1)
            .unwrap_or(UNKNOWN_TYPE_CHAR);
        self.type_lms.insert(
            kind.to_string(),
            NGramBoundaryLm::new(
                self.max_ngram,
                self.num_chars,
                self.lambda_factor,
                UNKNOWN_TYPE_CHAR,
            ),
        );
    }

    /// Train both the base chunker and the rescoring models on one
    /// reference chunking.
    pub fn train(&mut self, chunking: &Chunking) -> Result<(), ChunkError> {
        self.base.train(chunking)?;
        let chars = chunking.chars().to_vec();
        let mut chunks = chunking.chunks().to_vec();
        chunks.sort_by(text_order);
        let mut pos = 0usize;
        let mut prev_char = BOS_CHAR;
        for chunk in &chunks {
            self.create_type(chunk.kind());
            let tag_char = self.type_to_char[chunk.kind()];
            let gap: String = chars[pos..chunk.start()].iter().collect();
            self.train_out_wrapped(&gap, prev_char, tag_char);
            let span: String = chars[chunk.start()..chunk.end()].iter().collect();
            self.train_type(chunk.kind(), &span);
            pos = chunk.end();
            prev_char = tag_char;
        }
        let tail: String = chars[pos..].iter().collect();
        self.train_out_wrapped(&tail, prev_char, EOS_CHAR);
        Ok(())
    }

    /// Train the boundary model on non-chunk text directly.
    pub fn train_out(&mut self, text: &str) {
        self.out_lm.train(text);
    }

    /// Train a chunk type's model on a known phrase, creating the type
    /// if needed; also feeds the base chunker's dictionary training.
    pub fn train_dictionary(&mut self, text: &str, kind: &str) -> Result<(), ChunkError> {
        self.base.train_dictionary(text, kind)?;
        self.train_type(kind, text);
        Ok(())
    }

    fn train_type(&mut self, kind: &str, text: &str) {
        self.create_type(kind);
        if let Some(lm) = self.type_lms.get_mut(kind) {
            lm.train(text);
        }
    }

    fn train_out_wrapped(&mut self, text: &str, prev_char: char, next_char: char) {
        let mut wrapped = String::with_capacity(text.len() + 8);
        wrapped.push(prev_char);
        wrapped.push_str(text);
        wrapped.push(next_char);
        self.out_lm.train(&wrapped);
    }

    pub fn compile(&self) -> CharLmRescoringChunker<HmmChunker> {
        CharLmRescoringChunker::new(
            self.base.compile(),
            self.num_rescored,
            self.out_lm.clone(),
            self.type_lms.clone(),
            self.type_to_char.clone(),
        )
    }
}
