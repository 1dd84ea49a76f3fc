//! IO encoding: chunk tokens carry the bare type, non-chunk tokens `O`.
//!
//! IO cannot represent the boundary between two adjacent chunks of the
//! same type, so encodability additionally rejects that configuration.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::chunk::{Chunk, Chunking};
use crate::error::ChunkError;
use crate::hmm::TagLattice;
use crate::tagging::{StringTagging, Tagging};
use crate::tokenizer::TokenizerFactory;

use super::bio::BioTagChunkCodec;
use super::nbest::NBestChunkIter;
use super::tags::OUT_TAG;
use super::{check_token_alignment, require_factory, TagChunkCodec};

/// Tag-chunk codec for the IO encoding scheme.
///
/// Shares the BIO conversion core and rewrites begin/interior tags down to
/// the bare chunk type.
pub struct IoTagChunkCodec {
    factory: Option<Arc<dyn TokenizerFactory>>,
    enforce_consistency: bool,
    bio: BioTagChunkCodec,
}

impl IoTagChunkCodec {
    pub fn new(factory: Option<Arc<dyn TokenizerFactory>>, enforce_consistency: bool) -> Self {
        let bio = BioTagChunkCodec::new(factory.clone(), false);
        Self {
            factory,
            enforce_consistency,
            bio,
        }
    }

    pub fn enforce_consistency(&self) -> bool {
        self.enforce_consistency
    }

    fn enforce_encodable(&self, chunking: &Chunking) -> Result<(), ChunkError> {
        if !self.enforce_consistency {
            return Ok(());
        }
        self.check_encodable(chunking)
    }

    fn enforce_decodable(&self, tagging: &StringTagging) -> Result<(), ChunkError> {
        if !self.enforce_consistency {
            return Ok(());
        }
        self.check_decodable(tagging)
    }

    /// Rewrite BIO tags to IO form in place.
    fn transform_tags(tags: &mut [String]) {
        for tag in tags.iter_mut() {
            if tag != OUT_TAG {
                *tag = super::tags::base_tag(tag).to_string();
            }
        }
    }
}

impl TagChunkCodec for IoTagChunkCodec {
    fn to_tagging(&self, chunking: &Chunking) -> Result<Tagging, ChunkError> {
        self.enforce_encodable(chunking)?;
        let (tokens, mut tags, _, _) = self.bio.encode_lists(chunking)?;
        Self::transform_tags(&mut tags);
        Tagging::new(tokens, tags)
    }

    fn to_string_tagging(&self, chunking: &Chunking) -> Result<StringTagging, ChunkError> {
        self.enforce_encodable(chunking)?;
        let (tokens, mut tags, starts, ends) = self.bio.encode_lists(chunking)?;
        Self::transform_tags(&mut tags);
        StringTagging::new(tokens, tags, &chunking.text(), starts, ends)
    }

    fn to_chunking(&self, tagging: &StringTagging) -> Result<Chunking, ChunkError> {
        self.enforce_decodable(tagging)?;
        let mut chunking = Chunking::new(&tagging.text());
        let mut n = 0;
        while n < tagging.len() {
            let tag = tagging.tag(n).to_string();
            if tag == OUT_TAG {
                n += 1;
                continue;
            }
            let start = tagging.token_start(n);
            while n + 1 < tagging.len() && tagging.tag(n + 1) == tag {
                n += 1;
            }
            let end = tagging.token_end(n);
            chunking.add(Chunk::with_type(start, end, tag)?)?;
            n += 1;
        }
        Ok(chunking)
    }

    fn tag_set(&self, chunk_types: &BTreeSet<String>) -> BTreeSet<String> {
        let mut tags = chunk_types.clone();
        tags.insert(OUT_TAG.to_string());
        tags
    }

    fn legal_tags(&self, _tags: &[&str]) -> bool {
        true
    }

    fn legal_tag_sub_sequence(&self, _tags: &[&str]) -> bool {
        true
    }

    fn check_encodable(&self, chunking: &Chunking) -> Result<(), ChunkError> {
        self.bio.check_encodable(chunking)?;
        // Adjacent same-type chunks with no intervening token collapse
        // into one chunk under IO; flag them instead of merging silently.
        let tagging = self.bio.to_tagging(chunking)?;
        let mut last_tag = OUT_TAG.to_string();
        for tag in tagging.tags() {
            if let Some(base) = tag.strip_prefix(super::tags::BEGIN_TAG_PREFIX) {
                if last_tag != OUT_TAG && super::tags::base_tag(&last_tag) == base {
                    return Err(ChunkError::InconsistentInput(format!(
                        "two adjacent chunks of type {base} cannot be represented in IO encoding"
                    )));
                }
            }
            last_tag = tag.clone();
        }
        Ok(())
    }

    fn check_decodable(&self, tagging: &StringTagging) -> Result<(), ChunkError> {
        let factory = require_factory(self.factory.as_ref())?;
        check_token_alignment(factory.as_ref(), tagging)
    }

    fn n_best_chunks<'a>(
        &self,
        _lattice: &'a TagLattice,
        _token_starts: &[usize],
        _token_ends: &[usize],
        _max_results: usize,
    ) -> Result<NBestChunkIter<'a>, ChunkError> {
        Err(ChunkError::InvalidArgument(
            "n-best chunk extraction is not supported for the IO encoding".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordTokenizerFactory;

    fn codec(enforce: bool) -> IoTagChunkCodec {
        IoTagChunkCodec::new(Some(Arc::new(WordTokenizerFactory)), enforce)
    }

    #[test]
    fn test_to_tagging_io() {
        let mut chunking = Chunking::new("John smith went home");
        chunking
            .add(Chunk::with_type(0, 10, "PERSON").unwrap())
            .unwrap();
        let tagging = codec(true).to_tagging(&chunking).unwrap();
        assert_eq!(tagging.tags(), &["PERSON", "PERSON", "O", "O"]);
    }

    #[test]
    fn test_round_trip() {
        let codec = codec(true);
        let mut original = Chunking::new("Ann met Bob");
        original.add(Chunk::with_type(0, 3, "PERSON").unwrap()).unwrap();
        original.add(Chunk::with_type(8, 11, "PERSON").unwrap()).unwrap();
        let tagging = codec.to_string_tagging(&original).unwrap();
        assert_eq!(tagging.tags(), &["PERSON", "O", "PERSON"]);
        assert_eq!(codec.to_chunking(&tagging).unwrap(), original);
    }

    #[test]
    fn test_adjacent_same_type_not_encodable() {
        // "a b": two adjacent X chunks with no separating token.
        let mut chunking = Chunking::new("a b");
        chunking.add(Chunk::with_type(0, 1, "X").unwrap()).unwrap();
        chunking.add(Chunk::with_type(2, 3, "X").unwrap()).unwrap();
        let codec = codec(false);
        assert!(!codec.is_encodable(&chunking));
        let err = codec.check_encodable(&chunking).unwrap_err();
        assert!(err.to_string().contains("adjacent"));
    }

    #[test]
    fn test_adjacent_distinct_types_encodable() {
        let mut chunking = Chunking::new("a b");
        chunking.add(Chunk::with_type(0, 1, "X").unwrap()).unwrap();
        chunking.add(Chunk::with_type(2, 3, "Y").unwrap()).unwrap();
        assert!(codec(false).is_encodable(&chunking));
    }

    #[test]
    fn test_enforcement_rejects_adjacent_same_type() {
        let mut chunking = Chunking::new("a b");
        chunking.add(Chunk::with_type(0, 1, "X").unwrap()).unwrap();
        chunking.add(Chunk::with_type(2, 3, "X").unwrap()).unwrap();
        assert!(matches!(
            codec(true).to_tagging(&chunking),
            Err(ChunkError::InconsistentInput(_))
        ));
    }

    #[test]
    fn test_every_tag_sequence_legal() {
        let codec = codec(false);
        assert!(codec.legal_tags(&["PERSON", "O", "LOCATION"]));
        assert!(codec.legal_tag_sub_sequence(&["PERSON", "LOCATION"]));
    }

    #[test]
    fn test_tag_set() {
        let codec = codec(false);
        let types: BTreeSet<String> = ["X".to_string()].into();
        let tags = codec.tag_set(&types);
        assert!(tags.contains("X"));
        assert!(tags.contains("O"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_n_best_chunks_unsupported() {
        // Lattice contents are irrelevant; the call must fail fast.
        let lattice = crate::hmm::TagLattice::empty();
        assert!(matches!(
            codec(false).n_best_chunks(&lattice, &[], &[], 1),
            Err(ChunkError::InvalidArgument(_))
        ));
    }
}
