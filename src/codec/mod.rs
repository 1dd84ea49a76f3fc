//! Bidirectional mapping between chunkings and tag sequences.
//!
//! The two encoding schemes (BIO, IO) share a conversion core and the
//! tokenizer-consistency checks below; they diverge only in how chunks are
//! marked and in which tag adjacencies are legal.

mod bio;
mod io;
mod nbest;
pub mod tags;

pub use bio::BioTagChunkCodec;
pub use io::IoTagChunkCodec;
pub use nbest::NBestChunkIter;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::chunk::{Chunk, Chunking};
use crate::error::ChunkError;
use crate::hmm::TagLattice;
use crate::tagging::{StringTagging, Tagging};
use crate::tokenizer::TokenizerFactory;

/// Conversion between chunk sets and per-token tag sequences under one
/// encoding scheme.
pub trait TagChunkCodec {
    /// Encode a chunking as a tag sequence over its tokens.
    fn to_tagging(&self, chunking: &Chunking) -> Result<Tagging, ChunkError>;

    /// Encode a chunking as a tag sequence with token offsets.
    fn to_string_tagging(&self, chunking: &Chunking) -> Result<StringTagging, ChunkError>;

    /// Decode a tag sequence back into a chunking.
    fn to_chunking(&self, tagging: &StringTagging) -> Result<Chunking, ChunkError>;

    /// The full tag inventory induced by a set of chunk types.
    fn tag_set(&self, chunk_types: &BTreeSet<String>) -> BTreeSet<String>;

    /// Whether the tags form a legal complete sequence.
    fn legal_tags(&self, tags: &[&str]) -> bool;

    /// Whether the tags form a legal subsequence (may start mid-chunk).
    fn legal_tag_sub_sequence(&self, tags: &[&str]) -> bool;

    /// Check that a chunking is representable under this codec, reporting
    /// the first violation found.
    fn check_encodable(&self, chunking: &Chunking) -> Result<(), ChunkError>;

    /// Check that a tagging is consistent with this codec and its
    /// tokenizer, reporting the first violation found.
    fn check_decodable(&self, tagging: &StringTagging) -> Result<(), ChunkError>;

    fn is_encodable(&self, chunking: &Chunking) -> bool {
        self.check_encodable(chunking).is_ok()
    }

    fn is_decodable(&self, tagging: &StringTagging) -> bool {
        self.check_decodable(tagging).is_ok()
    }

    /// Lazily extract the n best individual chunks from a tag lattice.
    fn n_best_chunks<'a>(
        &self,
        lattice: &'a TagLattice,
        token_starts: &[usize],
        token_ends: &[usize],
        max_results: usize,
    ) -> Result<NBestChunkIter<'a>, ChunkError>;
}

pub(crate) fn require_factory<'a>(
    factory: Option<&'a Arc<dyn TokenizerFactory>>,
) -> Result<&'a Arc<dyn TokenizerFactory>, ChunkError> {
    factory.ok_or_else(|| {
        ChunkError::InvalidArgument(
            "tokenizer factory required for this codec operation".to_string(),
        )
    })
}

/// Check that the chunks are pairwise non-overlapping and that every
/// chunk's boundaries coincide with token boundaries.
pub(crate) fn check_chunk_alignment(
    factory: &dyn TokenizerFactory,
    chunking: &Chunking,
) -> Result<(), ChunkError> {
    let chunks = chunking.sorted_chunks();
    if chunks.is_empty() {
        return Ok(());
    }
    let mut last_end = chunks[0].end();
    for pair in chunks.windows(2) {
        if pair[1].start() < last_end {
            return Err(ChunkError::InconsistentInput(format!(
                "chunks must not overlap: {}-{}:{} and {}-{}:{}",
                pair[0].start(),
                pair[0].end(),
                pair[0].kind(),
                pair[1].start(),
                pair[1].end(),
                pair[1].kind()
            )));
        }
        last_end = pair[1].end();
    }

    let chars = chunking.chars();
    let mut tokenizer = factory.tokenizer(chars, 0, chars.len());
    let mut chunk_pos = 0;
    let mut chunk_started = false;
    while chunk_pos < chunks.len() && tokenizer.next_token().is_some() {
        if tokenizer.last_token_start() == chunks[chunk_pos].start() {
            chunk_started = true;
        }
        if tokenizer.last_token_end() == chunks[chunk_pos].end() {
            if !chunk_started {
                return Err(ChunkError::InconsistentInput(format!(
                    "chunk must start on a token boundary: {}-{}:{}",
                    chunks[chunk_pos].start(),
                    chunks[chunk_pos].end(),
                    chunks[chunk_pos].kind()
                )));
            }
            chunk_pos += 1;
            chunk_started = false;
        }
    }
    if chunk_pos < chunks.len() {
        return Err(ChunkError::InconsistentInput(format!(
            "chunk does not end on a token boundary: {}-{}:{}",
            chunks[chunk_pos].start(),
            chunks[chunk_pos].end(),
            chunks[chunk_pos].kind()
        )));
    }
    Ok(())
}

/// Check that a tagging's tokens and offsets match the tokenizer's output
/// over the same text.
pub(crate) fn check_token_alignment(
    factory: &dyn TokenizerFactory,
    tagging: &StringTagging,
) -> Result<(), ChunkError> {
    let chars = tagging.chars();
    let mut tokenizer = factory.tokenizer(chars, 0, chars.len());
    for n in 0..tagging.len() {
        let Some(token) = tokenizer.next_token() else {
            return Err(ChunkError::InconsistentInput(format!(
                "more tags than tokens: {} tags, tokenizer exhausted at {n}",
                tagging.len()
            )));
        };
        if tagging.token_start(n) != tokenizer.last_token_start()
            || tagging.token_end(n) != tokenizer.last_token_end()
        {
            return Err(ChunkError::InconsistentInput(format!(
                "token {n} misplaced: tokenizer found {token:?} at {}-{}, tagging has {}-{}",
                tokenizer.last_token_start(),
                tokenizer.last_token_end(),
                tagging.token_start(n),
                tagging.token_end(n)
            )));
        }
    }
    if let Some(excess) = tokenizer.next_token() {
        return Err(ChunkError::InconsistentInput(format!(
            "tokenizer produced token {excess:?} beyond the tagging at {}-{}",
            tokenizer.last_token_start(),
            tokenizer.last_token_end()
        )));
    }
    Ok(())
}

/// Assemble a chunking from a decoded tag run, comparing tags in inner
/// form so a begin tag always closes the running chunk.
pub(crate) fn chunking_from_tag_run(
    text: &str,
    tags: &[String],
    token_starts: &[usize],
    token_ends: &[usize],
) -> Result<Chunking, ChunkError> {
    let mut chunking = Chunking::new(text);
    let mut run_tag = tags::OUT_TAG.to_string();
    let mut run_start = 0;
    let mut run_end = 0;
    for (i, tag) in tags.iter().enumerate() {
        if *tag != run_tag {
            if !tags::is_out_tag(&run_tag) {
                chunking.add(Chunk::with_type(run_start, run_end, tags::base_tag(&run_tag))?)?;
            }
            run_tag = tags::to_inner_tag(tag);
            run_start = token_starts[i];
        }
        run_end = token_ends[i];
    }
    if !tags::is_out_tag(&run_tag) {
        chunking.add(Chunk::with_type(run_start, run_end, tags::base_tag(&run_tag))?)?;
    }
    Ok(chunking)
}
