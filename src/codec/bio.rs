//! BIO encoding: chunk-begin `B_<type>`, chunk-interior `I_<type>`,
//! non-chunk `O`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::chunk::{Chunk, Chunking};
use crate::error::ChunkError;
use crate::hmm::TagLattice;
use crate::tagging::{StringTagging, Tagging};
use crate::tokenizer::TokenizerFactory;

use super::nbest::NBestChunkIter;
use super::tags::{BEGIN_TAG_PREFIX, IN_TAG_PREFIX, OUT_TAG};
use super::{check_chunk_alignment, check_token_alignment, require_factory, TagChunkCodec};

/// Tag-chunk codec for the BIO encoding scheme.
pub struct BioTagChunkCodec {
    factory: Option<Arc<dyn TokenizerFactory>>,
    enforce_consistency: bool,
    begin_prefix: String,
    in_prefix: String,
    out_tag: String,
}

impl BioTagChunkCodec {
    pub fn new(factory: Option<Arc<dyn TokenizerFactory>>, enforce_consistency: bool) -> Self {
        Self::with_tags(
            factory,
            enforce_consistency,
            BEGIN_TAG_PREFIX,
            IN_TAG_PREFIX,
            OUT_TAG,
        )
    }

    pub fn with_tags(
        factory: Option<Arc<dyn TokenizerFactory>>,
        enforce_consistency: bool,
        begin_prefix: &str,
        in_prefix: &str,
        out_tag: &str,
    ) -> Self {
        Self {
            factory,
            enforce_consistency,
            begin_prefix: begin_prefix.to_string(),
            in_prefix: in_prefix.to_string(),
            out_tag: out_tag.to_string(),
        }
    }

    pub fn enforce_consistency(&self) -> bool {
        self.enforce_consistency
    }

    fn legal_tag_single(&self, tag: &str) -> bool {
        tag == self.out_tag
            || tag.starts_with(&self.begin_prefix)
            || tag.starts_with(&self.in_prefix)
    }

    /// A pair is legal unless the second tag is an interior tag whose base
    /// type differs from the first tag's base type.
    pub fn legal_tag_pair(&self, tag1: &str, tag2: &str) -> bool {
        if !self.legal_tag_single(tag1) || !self.legal_tag_single(tag2) {
            return false;
        }
        match tag2.strip_prefix(&self.in_prefix) {
            Some(base) => {
                let base1 = tag1
                    .strip_prefix(&self.begin_prefix)
                    .or_else(|| tag1.strip_prefix(&self.in_prefix))
                    .unwrap_or(tag1);
                base1 == base
            }
            None => true,
        }
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

    /// Tokenize `[start, end)` as outside-chunk text.
    #[allow(clippy::too_many_arguments)]
    fn out_tags(
        &self,
        chars: &[char],
        start: usize,
        end: usize,
        tokens: &mut Vec<String>,
        tags: &mut Vec<String>,
        token_starts: &mut Vec<usize>,
        token_ends: &mut Vec<usize>,
        factory: &dyn TokenizerFactory,
    ) {
        let mut tokenizer = factory.tokenizer(chars, start, end - start);
        while let Some(token) = tokenizer.next_token() {
            tokens.push(token);
            token_starts.push(start + tokenizer.last_token_start());
            token_ends.push(start + tokenizer.last_token_end());
            tags.push(self.out_tag.clone());
        }
    }

    /// Tokenize a chunk's span, tagging the first token begin and the rest
    /// interior.
    #[allow(clippy::too_many_arguments)]
    fn chunk_tags(
        &self,
        chars: &[char],
        kind: &str,
        start: usize,
        end: usize,
        tokens: &mut Vec<String>,
        tags: &mut Vec<String>,
        token_starts: &mut Vec<usize>,
        token_ends: &mut Vec<usize>,
        factory: &dyn TokenizerFactory,
    ) -> Result<(), ChunkError> {
        let mut tokenizer = factory.tokenizer(chars, start, end - start);
        let Some(first) = tokenizer.next_token() else {
            let span: String = chars[start..end].iter().collect();
            return Err(ChunkError::EmptyChunk(format!(
                "chunk {start}-{end}:{kind} tokenizes to nothing, span={span:?}"
            )));
        };
        tokens.push(first);
        token_starts.push(start + tokenizer.last_token_start());
        token_ends.push(start + tokenizer.last_token_end());
        tags.push(format!("{}{kind}", self.begin_prefix));
        while let Some(token) = tokenizer.next_token() {
            tokens.push(token);
            token_starts.push(start + tokenizer.last_token_start());
            token_ends.push(start + tokenizer.last_token_end());
            tags.push(format!("{}{kind}", self.in_prefix));
        }
        Ok(())
    }

    /// Shared encode core: produces parallel token/tag/offset lists for a
    /// chunking. The IO codec reuses this and rewrites the tags.
    pub(super) fn encode_lists(
        &self,
        chunking: &Chunking,
    ) -> Result<(Vec<String>, Vec<String>, Vec<usize>, Vec<usize>), ChunkError> {
        let factory = require_factory(self.factory.as_ref())?.clone();
        let chars = chunking.chars();
        let mut tokens = Vec::new();
        let mut tags = Vec::new();
        let mut token_starts = Vec::new();
        let mut token_ends = Vec::new();
        let mut pos = 0;
        for chunk in chunking.sorted_chunks() {
            self.out_tags(
                chars,
                pos,
                chunk.start(),
                &mut tokens,
                &mut tags,
                &mut token_starts,
                &mut token_ends,
                factory.as_ref(),
            );
            self.chunk_tags(
                chars,
                chunk.kind(),
                chunk.start(),
                chunk.end(),
                &mut tokens,
                &mut tags,
                &mut token_starts,
                &mut token_ends,
                factory.as_ref(),
            )?;
            pos = chunk.end();
        }
        self.out_tags(
            chars,
            pos,
            chars.len(),
            &mut tokens,
            &mut tags,
            &mut token_starts,
            &mut token_ends,
            factory.as_ref(),
        );
        Ok((tokens, tags, token_starts, token_ends))
    }
}

impl TagChunkCodec for BioTagChunkCodec {
    fn to_tagging(&self, chunking: &Chunking) -> Result<Tagging, ChunkError> {
        self.enforce_encodable(chunking)?;
        let (tokens, tags, _, _) = self.encode_lists(chunking)?;
        Tagging::new(tokens, tags)
    }

    fn to_string_tagging(&self, chunking: &Chunking) -> Result<StringTagging, ChunkError> {
        self.enforce_encodable(chunking)?;
        let (tokens, tags, starts, ends) = self.encode_lists(chunking)?;
        StringTagging::new(tokens, tags, &chunking.text(), starts, ends)
    }

    fn to_chunking(&self, tagging: &StringTagging) -> Result<Chunking, ChunkError> {
        self.enforce_decodable(tagging)?;
        let mut chunking = Chunking::new(&tagging.text());
        let mut n = 0;
        while n < tagging.len() {
            let tag = tagging.tag(n);
            if tag == self.out_tag {
                n += 1;
                continue;
            }
            let Some(kind) = tag.strip_prefix(&self.begin_prefix) else {
                if n == 0 {
                    return Err(ChunkError::IllegalTagSequence(format!(
                        "first tag must be out or begin, found {tag:?}"
                    )));
                }
                return Err(ChunkError::IllegalTagSequence(format!(
                    "tag {:?} at {} may not follow {:?}",
                    tag,
                    n,
                    tagging.tag(n - 1)
                )));
            };
            let start = tagging.token_start(n);
            let in_tag = format!("{}{kind}", self.in_prefix);
            while n + 1 < tagging.len() && tagging.tag(n + 1) == in_tag {
                n += 1;
            }
            let end = tagging.token_end(n);
            chunking.add(Chunk::with_type(start, end, kind)?)?;
            n += 1;
        }
        Ok(chunking)
    }

    fn tag_set(&self, chunk_types: &BTreeSet<String>) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        tags.insert(self.out_tag.clone());
        for kind in chunk_types {
            tags.insert(format!("{}{kind}", self.begin_prefix));
            tags.insert(format!("{}{kind}", self.in_prefix));
        }
        tags
    }

    fn legal_tags(&self, tags: &[&str]) -> bool {
        self.legal_tag_sub_sequence(tags)
            && (tags.is_empty() || !tags[0].starts_with(&self.in_prefix))
    }

    fn legal_tag_sub_sequence(&self, tags: &[&str]) -> bool {
        match tags {
            [] => true,
            [only] => self.legal_tag_single(only),
            _ => tags
                .windows(2)
                .all(|pair| self.legal_tag_pair(pair[0], pair[1])),
        }
    }

    fn check_encodable(&self, chunking: &Chunking) -> Result<(), ChunkError> {
        let factory = require_factory(self.factory.as_ref())?;
        check_chunk_alignment(factory.as_ref(), chunking)
    }

    fn check_decodable(&self, tagging: &StringTagging) -> Result<(), ChunkError> {
        let tags: Vec<&str> = tagging.tags().iter().map(|s| s.as_str()).collect();
        if !self.legal_tags(&tags) {
            return Err(ChunkError::InconsistentInput(format!(
                "illegal tag sequence: {tags:?}"
            )));
        }
        let factory = require_factory(self.factory.as_ref())?;
        check_token_alignment(factory.as_ref(), tagging)
    }

    fn n_best_chunks<'a>(
        &self,
        lattice: &'a TagLattice,
        token_starts: &[usize],
        token_ends: &[usize],
        max_results: usize,
    ) -> Result<NBestChunkIter<'a>, ChunkError> {
        NBestChunkIter::new(
            lattice,
            token_starts,
            token_ends,
            max_results,
            &self.begin_prefix,
            &self.in_prefix,
            &self.out_tag,
        )
    }
}
