//! Chunks and chunkings: typed, scored spans over a character sequence.
//!
//! All offsets are character (not byte) offsets, half-open `[start, end)`.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ChunkError;

/// Chunk type used when none is given.
pub const DEFAULT_CHUNK_TYPE: &str = "CHUNK";

/// A labeled span with an optional score.
///
/// Equality and hashing cover `(start, end, type)` only; the score is
/// informational and never participates in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    start: usize,
    end: usize,
    kind: String,
    score: f64,
}

impl Chunk {
    /// Create an untyped, unscored chunk. Fails if `start > end`.
    pub fn new(start: usize, end: usize) -> Result<Self, ChunkError> {
        Self::with_score(start, end, DEFAULT_CHUNK_TYPE, f64::NEG_INFINITY)
    }

    /// Create a typed, unscored chunk. Fails if `start > end`.
    pub fn with_type(start: usize, end: usize, kind: impl Into<String>) -> Result<Self, ChunkError> {
        Self::with_score(start, end, kind, f64::NEG_INFINITY)
    }

    /// Create a typed, scored chunk. Fails if `start > end`.
    pub fn with_score(
        start: usize,
        end: usize,
        kind: impl Into<String>,
        score: f64,
    ) -> Result<Self, ChunkError> {
        if start > end {
            return Err(ChunkError::InvalidSpan { start, end });
        }
        Ok(Self {
            start,
            end,
            kind: kind.into(),
            score,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Copy of this chunk with the score replaced.
    pub fn rescored(&self, score: f64) -> Self {
        Self {
            start: self.start,
            end: self.end,
            kind: self.kind.clone(),
            score,
        }
    }

    /// Copy of this chunk with the score dropped.
    pub fn unscored(&self) -> Self {
        self.rescored(f64::NEG_INFINITY)
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end && self.kind == other.kind
    }
}

impl Eq for Chunk {}

impl Hash for Chunk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.hash(state);
        self.end.hash(state);
        self.kind.hash(state);
    }
}

/// Text order: by start ascending, then end ascending.
pub fn text_order(a: &Chunk, b: &Chunk) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(a.end.cmp(&b.end))
}

/// Longest-match order: by start ascending, end descending, score
/// descending, then type.
pub fn longest_match_order(a: &Chunk, b: &Chunk) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(b.end.cmp(&a.end))
        .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        .then(a.kind.cmp(&b.kind))
}

/// Whether two chunks overlap on at least one character position.
pub fn overlap(a: &Chunk, b: &Chunk) -> bool {
    overlap_one_way(a, b) || overlap_one_way(b, a)
}

fn overlap_one_way(a: &Chunk, b: &Chunk) -> bool {
    a.start <= b.start && b.start < a.end
}

/// A character sequence plus a duplicate-free set of chunks over it.
///
/// Chunks iterate in insertion order but compare as a set. Every chunk's
/// end must lie within the character sequence.
#[derive(Debug, Clone)]
pub struct Chunking {
    chars: Vec<char>,
    chunks: Vec<Chunk>,
}

impl Chunking {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            chunks: Vec::new(),
        }
    }

    /// Add a chunk; duplicates (same start/end/type) are ignored.
    /// Fails if the chunk extends past the character sequence.
    pub fn add(&mut self, chunk: Chunk) -> Result<(), ChunkError> {
        if chunk.end() > self.chars.len() {
            return Err(ChunkError::InvalidSpan {
                start: chunk.start(),
                end: chunk.end(),
            });
        }
        if !self.chunks.contains(&chunk) {
            self.chunks.push(chunk);
        }
        Ok(())
    }

    pub fn add_all(&mut self, chunks: impl IntoIterator<Item = Chunk>) -> Result<(), ChunkError> {
        for chunk in chunks {
            self.add(chunk)?;
        }
        Ok(())
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunks sorted into text order.
    pub fn sorted_chunks(&self) -> Vec<Chunk> {
        let mut sorted = self.chunks.clone();
        sorted.sort_by(text_order);
        sorted
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// The chunk's yield: the characters it spans.
    pub fn span_of(&self, chunk: &Chunk) -> String {
        self.chars[chunk.start()..chunk.end()].iter().collect()
    }

    /// Combine two chunkings over the same text into one non-overlapping
    /// chunking. Chunks from `first` win over overlapping chunks from
    /// `second`; within each input, earlier chunks in text order win.
    pub fn merge(first: &Chunking, second: &Chunking) -> Result<Chunking, ChunkError> {
        if first.chars != second.chars {
            return Err(ChunkError::InvalidArgument(
                "chunkings must be over the same character sequence".to_string(),
            ));
        }
        let mut merged = Chunking::new(&first.text());
        let mut candidates = first.sorted_chunks();
        candidates.extend(second.sorted_chunks());
        // First-chunking chunks sort stably ahead of second-chunking ones
        // at equal positions, so they win conflicts.
        candidates.sort_by(text_order);
        let mut kept: Vec<Chunk> = Vec::new();
        for chunk in candidates {
            if kept.iter().all(|k| !overlap(k, &chunk)) {
                kept.push(chunk);
            }
        }
        merged.add_all(kept)?;
        Ok(merged)
    }
}

impl PartialEq for Chunking {
    fn eq(&self, other: &Self) -> bool {
        if self.chars != other.chars || self.chunks.len() != other.chunks.len() {
            return false;
        }
        self.chunks.iter().all(|c| other.chunks.contains(c))
    }
}

impl Eq for Chunking {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_span_rejected() {
        assert!(matches!(
            Chunk::new(3, 2),
            Err(ChunkError::InvalidSpan { start: 3, end: 2 })
        ));
        assert!(Chunk::new(2, 2).is_ok());
    }

    #[test]
    fn test_equality_ignores_score() {
        let a = Chunk::with_score(0, 3, "X", 0.9).unwrap();
        let b = Chunk::with_score(0, 3, "X", 0.1).unwrap();
        let c = Chunk::with_score(0, 3, "Y", 0.9).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_ignores_score() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Chunk::with_score(0, 3, "X", 0.9).unwrap());
        assert!(set.contains(&Chunk::with_score(0, 3, "X", 0.1).unwrap()));
    }

    #[test]
    fn test_text_order() {
        let a = Chunk::with_type(0, 5, "X").unwrap();
        let b = Chunk::with_type(0, 7, "X").unwrap();
        let c = Chunk::with_type(2, 3, "X").unwrap();
        assert_eq!(text_order(&a, &b), Ordering::Less);
        assert_eq!(text_order(&b, &c), Ordering::Less);
        assert_eq!(text_order(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_longest_match_order_prefers_longer_then_higher_score() {
        let long = Chunk::with_score(0, 7, "X", 0.1).unwrap();
        let short = Chunk::with_score(0, 5, "X", 0.9).unwrap();
        assert_eq!(longest_match_order(&long, &short), Ordering::Less);

        let hi = Chunk::with_score(0, 5, "X", 0.9).unwrap();
        let lo = Chunk::with_score(0, 5, "X", 0.2).unwrap();
        assert_eq!(longest_match_order(&hi, &lo), Ordering::Less);
    }

    #[test]
    fn test_overlap() {
        let a = Chunk::with_type(0, 5, "X").unwrap();
        let b = Chunk::with_type(4, 8, "Y").unwrap();
        let c = Chunk::with_type(5, 8, "Y").unwrap();
        assert!(overlap(&a, &b));
        assert!(!overlap(&a, &c)); // adjacent, not overlapping
    }

    #[test]
    fn test_chunking_rejects_out_of_bounds() {
        let mut chunking = Chunking::new("abc");
        assert!(matches!(
            chunking.add(Chunk::with_type(0, 4, "X").unwrap()),
            Err(ChunkError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_chunking_dedups_and_preserves_order() {
        let mut chunking = Chunking::new("abcdef");
        chunking.add(Chunk::with_type(3, 5, "B").unwrap()).unwrap();
        chunking.add(Chunk::with_type(0, 2, "A").unwrap()).unwrap();
        chunking
            .add(Chunk::with_score(3, 5, "B", 1.0).unwrap())
            .unwrap(); // duplicate modulo score
        assert_eq!(chunking.chunks().len(), 2);
        assert_eq!(chunking.chunks()[0].kind(), "B"); // insertion order
        assert_eq!(chunking.sorted_chunks()[0].kind(), "A"); // text order
    }

    #[test]
    fn test_chunking_equality_order_independent() {
        let mut a = Chunking::new("abcdef");
        a.add(Chunk::with_type(0, 2, "X").unwrap()).unwrap();
        a.add(Chunk::with_type(3, 5, "Y").unwrap()).unwrap();
        let mut b = Chunking::new("abcdef");
        b.add(Chunk::with_type(3, 5, "Y").unwrap()).unwrap();
        b.add(Chunk::with_type(0, 2, "X").unwrap()).unwrap();
        assert_eq!(a, b);

        let mut c = Chunking::new("abcdef");
        c.add(Chunk::with_type(0, 2, "X").unwrap()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_span_of() {
        let mut chunking = Chunking::new("John ran");
        let chunk = Chunk::with_type(0, 4, "PERSON").unwrap();
        chunking.add(chunk.clone()).unwrap();
        assert_eq!(chunking.span_of(&chunk), "John");
    }

    #[test]
    fn test_merge_first_wins() {
        let mut a = Chunking::new("abcdefgh");
        a.add(Chunk::with_type(0, 4, "A").unwrap()).unwrap();
        let mut b = Chunking::new("abcdefgh");
        b.add(Chunk::with_type(2, 6, "B").unwrap()).unwrap();
        b.add(Chunk::with_type(6, 8, "C").unwrap()).unwrap();

        let merged = Chunking::merge(&a, &b).unwrap();
        let sorted = merged.sorted_chunks();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].kind(), "A"); // overlap with B resolved for A
        assert_eq!(sorted[1].kind(), "C");
    }

    #[test]
    fn test_merge_requires_same_text() {
        let a = Chunking::new("abc");
        let b = Chunking::new("abd");
        assert!(matches!(
            Chunking::merge(&a, &b),
            Err(ChunkError::InvalidArgument(_))
        ));
    }
}
