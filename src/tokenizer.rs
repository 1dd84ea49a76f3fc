//! Tokenizer and token-categorizer capabilities.
//!
//! The engine consumes tokenization as an opaque capability: given a
//! character window, produce the alternating whitespace/token stream with
//! per-token offsets. The concrete implementations here are deliberately
//! small; callers with their own tokenizers implement the traits instead.

use serde::{Deserialize, Serialize};

/// A restartable stream of tokens and the whitespace between them.
///
/// The stream alternates `whitespace, token, whitespace, token, ...,
/// whitespace`: `next_whitespace` before the first `next_token` yields the
/// leading whitespace, and after the last token yields the trailing
/// whitespace. Offsets are char positions relative to the window start.
pub trait Tokenizer {
    /// The next token, or `None` when the window is exhausted.
    fn next_token(&mut self) -> Option<String>;

    /// The whitespace before the next token (possibly empty).
    fn next_whitespace(&mut self) -> String;

    /// Start offset of the most recently returned token.
    fn last_token_start(&self) -> usize;

    /// End offset of the most recently returned token.
    fn last_token_end(&self) -> usize;

    /// Drain the stream into parallel token and whitespace lists; the
    /// whitespace list has one more element than the token list.
    fn tokenize(&mut self) -> (Vec<String>, Vec<String>) {
        let mut tokens = Vec::new();
        let mut whitespaces = vec![self.next_whitespace()];
        while let Some(token) = self.next_token() {
            tokens.push(token);
            whitespaces.push(self.next_whitespace());
        }
        (tokens, whitespaces)
    }
}

/// Factory producing tokenizers over char windows.
pub trait TokenizerFactory: Send + Sync {
    fn tokenizer<'a>(&self, chars: &'a [char], start: usize, len: usize)
        -> Box<dyn Tokenizer + 'a>;
}

/// Categorizes out-of-vocabulary tokens into canonical shape classes.
pub trait TokenCategorizer: Send + Sync {
    /// The category of the given token.
    fn categorize(&self, token: &str) -> String;

    /// The full category inventory, for symbol-table seeding.
    fn categories(&self) -> Vec<String>;
}

/// Tokenize a whole text, deriving char offsets from the token and
/// whitespace lengths. Returns tokens, whitespaces, starts and ends.
pub(crate) fn tokenize_with_offsets(
    factory: &dyn TokenizerFactory,
    text: &str,
) -> (Vec<String>, Vec<String>, Vec<usize>, Vec<usize>) {
    let chars: Vec<char> = text.chars().collect();
    let mut tokenizer = factory.tokenizer(&chars, 0, chars.len());
    let (tokens, whitespaces) = tokenizer.tokenize();
    let mut starts = Vec::with_capacity(tokens.len());
    let mut ends = Vec::with_capacity(tokens.len());
    let mut pos = whitespaces[0].chars().count();
    for (i, token) in tokens.iter().enumerate() {
        starts.push(pos);
        pos += token.chars().count();
        ends.push(pos);
        pos += whitespaces[i + 1].chars().count();
    }
    (tokens, whitespaces, starts, ends)
}

/// Default tokenizer: alphanumeric runs are tokens, every other non-space
/// character is a single-character token.
#[derive(Debug, Clone, Default)]
pub struct WordTokenizerFactory;

impl TokenizerFactory for WordTokenizerFactory {
    fn tokenizer<'a>(
        &self,
        chars: &'a [char],
        start: usize,
        len: usize,
    ) -> Box<dyn Tokenizer + 'a> {
        Box::new(WordTokenizer {
            chars: &chars[start..start + len],
            pos: 0,
            last_start: 0,
            last_end: 0,
        })
    }
}

struct WordTokenizer<'a> {
    chars: &'a [char],
    pos: usize,
    last_start: usize,
    last_end: usize,
}

impl Tokenizer for WordTokenizer<'_> {
    fn next_token(&mut self) -> Option<String> {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
        if self.pos >= self.chars.len() {
            return None;
        }
        let start = self.pos;
        if self.chars[self.pos].is_alphanumeric() {
            while self.pos < self.chars.len() && self.chars[self.pos].is_alphanumeric() {
                self.pos += 1;
            }
        } else {
            self.pos += 1;
        }
        self.last_start = start;
        self.last_end = self.pos;
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn next_whitespace(&mut self) -> String {
        let start = self.pos;
        let mut end = start;
        while end < self.chars.len() && self.chars[end].is_whitespace() {
            end += 1;
        }
        self.chars[start..end].iter().collect()
    }

    fn last_token_start(&self) -> usize {
        self.last_start
    }

    fn last_token_end(&self) -> usize {
        self.last_end
    }
}

/// Default categorizer mapping tokens to coarse shape classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeCategorizer;

const SHAPE_CATEGORIES: &[&str] = &[
    "NUM-CAT",
    "ALLCAPS-CAT",
    "CAP-CAT",
    "LOWER-CAT",
    "PUNCT-CAT",
    "MIXED-CAT",
];

impl TokenCategorizer for ShapeCategorizer {
    fn categorize(&self, token: &str) -> String {
        let mut has_digit = false;
        let mut has_upper = false;
        let mut has_lower = false;
        let mut has_other = false;
        for c in token.chars() {
            if c.is_ascii_digit() {
                has_digit = true;
            } else if c.is_uppercase() {
                has_upper = true;
            } else if c.is_lowercase() {
                has_lower = true;
            } else {
                has_other = true;
            }
        }
        let category = match (has_digit, has_upper, has_lower, has_other) {
            (true, false, false, false) => "NUM-CAT",
            (false, true, false, false) => {
                if token.chars().count() > 1 {
                    "ALLCAPS-CAT"
                } else {
                    "CAP-CAT"
                }
            }
            (false, true, true, false) => {
                let mut chars = token.chars();
                if chars.next().is_some_and(|c| c.is_uppercase())
                    && chars.all(|c| c.is_lowercase())
                {
                    "CAP-CAT"
                } else {
                    "MIXED-CAT"
                }
            }
            (false, false, true, false) => "LOWER-CAT",
            (false, false, false, true) => "PUNCT-CAT",
            _ => "MIXED-CAT",
        };
        category.to_string()
    }

    fn categories(&self) -> Vec<String> {
        SHAPE_CATEGORIES.iter().map(|s| s.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(text: &str) -> (Vec<String>, Vec<String>) {
        let chars: Vec<char> = text.chars().collect();
        let factory = WordTokenizerFactory;
        let mut tokenizer = factory.tokenizer(&chars, 0, chars.len());
        tokenizer.tokenize()
    }

    #[test]
    fn test_tokenize_words_and_punct() {
        let (tokens, whites) = tokenize("John ran, fast");
        assert_eq!(tokens, vec!["John", "ran", ",", "fast"]);
        assert_eq!(whites, vec!["", " ", "", " ", ""]);
    }

    #[test]
    fn test_tokenize_leading_trailing_space() {
        let (tokens, whites) = tokenize("  a b ");
        assert_eq!(tokens, vec!["a", "b"]);
        assert_eq!(whites, vec!["  ", " ", " "]);
    }

    #[test]
    fn test_token_offsets() {
        let chars: Vec<char> = "ab cd".chars().collect();
        let factory = WordTokenizerFactory;
        let mut tokenizer = factory.tokenizer(&chars, 0, chars.len());
        tokenizer.next_token();
        assert_eq!(tokenizer.last_token_start(), 0);
        assert_eq!(tokenizer.last_token_end(), 2);
        tokenizer.next_token();
        assert_eq!(tokenizer.last_token_start(), 3);
        assert_eq!(tokenizer.last_token_end(), 5);
    }

    #[test]
    fn test_windowed_offsets_are_relative() {
        let chars: Vec<char> = "xx ab".chars().collect();
        let factory = WordTokenizerFactory;
        let mut tokenizer = factory.tokenizer(&chars, 3, 2);
        assert_eq!(tokenizer.next_token(), Some("ab".to_string()));
        assert_eq!(tokenizer.last_token_start(), 0);
    }

    #[test]
    fn test_empty_window() {
        let chars: Vec<char> = "abc".chars().collect();
        let factory = WordTokenizerFactory;
        let mut tokenizer = factory.tokenizer(&chars, 1, 0);
        assert_eq!(tokenizer.next_token(), None);
    }

    #[test]
    fn test_shape_categories() {
        let cat = ShapeCategorizer;
        assert_eq!(cat.categorize("1234"), "NUM-CAT");
        assert_eq!(cat.categorize("NATO"), "ALLCAPS-CAT");
        assert_eq!(cat.categorize("John"), "CAP-CAT");
        assert_eq!(cat.categorize("X"), "CAP-CAT");
        assert_eq!(cat.categorize("ran"), "LOWER-CAT");
        assert_eq!(cat.categorize(";"), "PUNCT-CAT");
        assert_eq!(cat.categorize("McDonald"), "MIXED-CAT");
        assert_eq!(cat.categorize("R2D2"), "MIXED-CAT");
    }

    #[test]
    fn test_categories_cover_categorize_outputs() {
        let cat = ShapeCategorizer;
        let inventory = cat.categories();
        for token in ["99", "ABC", "Word", "word", "!", "a1"] {
            assert!(inventory.contains(&cat.categorize(token)));
        }
    }
}
