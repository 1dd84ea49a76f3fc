//! Parallel token/tag sequences, with and without character offsets.

use crate::error::ChunkError;

/// A sequence of tokens with one tag per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagging {
    tokens: Vec<String>,
    tags: Vec<String>,
}

impl Tagging {
    pub fn new(tokens: Vec<String>, tags: Vec<String>) -> Result<Self, ChunkError> {
        if tokens.len() != tags.len() {
            return Err(ChunkError::InvalidArgument(format!(
                "tokens and tags must be the same length, got {} tokens and {} tags",
                tokens.len(),
                tags.len()
            )));
        }
        Ok(Self { tokens, tags })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn token(&self, n: usize) -> &str {
        &self.tokens[n]
    }

    pub fn tag(&self, n: usize) -> &str {
        &self.tags[n]
    }
}

/// A tagging anchored to a character sequence: every token carries its
/// `(start, end)` char offsets into the underlying text.
///
/// Offsets must be in bounds, non-decreasing and non-overlapping; the
/// constructor rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTagging {
    tagging: Tagging,
    chars: Vec<char>,
    token_starts: Vec<usize>,
    token_ends: Vec<usize>,
}

impl StringTagging {
    pub fn new(
        tokens: Vec<String>,
        tags: Vec<String>,
        text: &str,
        token_starts: Vec<usize>,
        token_ends: Vec<usize>,
    ) -> Result<Self, ChunkError> {
        let tagging = Tagging::new(tokens, tags)?;
        if token_starts.len() != tagging.len() || token_ends.len() != tagging.len() {
            return Err(ChunkError::InvalidArgument(format!(
                "offset arrays must match token count {}, got {} starts and {} ends",
                tagging.len(),
                token_starts.len(),
                token_ends.len()
            )));
        }
        let chars: Vec<char> = text.chars().collect();
        let mut last_end = 0usize;
        for n in 0..tagging.len() {
            let (start, end) = (token_starts[n], token_ends[n]);
            if start > end || end > chars.len() {
                return Err(ChunkError::InvalidArgument(format!(
                    "token {n} offsets out of bounds: start={start} end={end} len={}",
                    chars.len()
                )));
            }
            if start < last_end {
                return Err(ChunkError::InvalidArgument(format!(
                    "token {n} overlaps the previous token: start={start} previous end={last_end}"
                )));
            }
            last_end = end;
        }
        Ok(Self {
            tagging,
            chars,
            token_starts,
            token_ends,
        })
    }

    pub fn len(&self) -> usize {
        self.tagging.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tagging.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        self.tagging.tokens()
    }

    pub fn tags(&self) -> &[String] {
        self.tagging.tags()
    }

    pub fn token(&self, n: usize) -> &str {
        self.tagging.token(n)
    }

    pub fn tag(&self, n: usize) -> &str {
        self.tagging.tag(n)
    }

    pub fn token_start(&self, n: usize) -> usize {
        self.token_starts[n]
    }

    pub fn token_end(&self, n: usize) -> usize {
        self.token_ends[n]
    }

    pub fn token_starts(&self) -> &[usize] {
        &self.token_starts
    }

    pub fn token_ends(&self) -> &[usize] {
        &self.token_ends
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn tagging(&self) -> &Tagging {
        &self.tagging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tagging_length_mismatch() {
        assert!(matches!(
            Tagging::new(strs(&["a", "b"]), strs(&["O"])),
            Err(ChunkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_string_tagging_valid() {
        let tagging = StringTagging::new(
            strs(&["John", "ran"]),
            strs(&["B_PERSON", "O"]),
            "John ran",
            vec![0, 5],
            vec![4, 8],
        )
        .unwrap();
        assert_eq!(tagging.token_start(1), 5);
        assert_eq!(tagging.token_end(1), 8);
        assert_eq!(tagging.tag(0), "B_PERSON");
    }

    #[test]
    fn test_string_tagging_rejects_overlap() {
        let result = StringTagging::new(
            strs(&["ab", "bc"]),
            strs(&["O", "O"]),
            "abc",
            vec![0, 1],
            vec![2, 3],
        );
        assert!(matches!(result, Err(ChunkError::InvalidArgument(_))));
    }

    #[test]
    fn test_string_tagging_rejects_out_of_bounds() {
        let result = StringTagging::new(
            strs(&["abc"]),
            strs(&["O"]),
            "ab",
            vec![0],
            vec![3],
        );
        assert!(matches!(result, Err(ChunkError::InvalidArgument(_))));
    }
}
