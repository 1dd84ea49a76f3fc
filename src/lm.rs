//! Character n-gram language models with Witten-Bell interpolation.
//!
//! Estimates are base-2 log probabilities. The same discounting formula
//! as the token-shape estimator is used: a context with total count `t`
//! and `d` distinct outcomes keeps `t / (t + lambda_factor * d)` of its
//! probability mass and hands the rest to the next-shorter context, down
//! to a uniform distribution over `num_chars` characters.

use serde::{Deserialize, Serialize};

const DEFAULT_NUM_CHARS: usize = 256;
const DEFAULT_LAMBDA_FACTOR: f64 = 4.0;

/// Sentinel used by the boundary model to mark sequence edges.
pub const BOUNDARY_CHAR: char = '\u{FFFF}';

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LmNode {
    children: Vec<(char, usize)>,
    count: u64,
}

impl LmNode {
    fn new() -> Self {
        Self {
            children: Vec::new(),
            count: 0,
        }
    }

    fn child(&self, c: char) -> Option<usize> {
        self.children
            .binary_search_by_key(&c, |&(ch, _)| ch)
            .ok()
            .map(|i| self.children[i].1)
    }
}

/// A process character LM: assigns probability to each character given
/// its preceding context, with no built-in boundary handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NGramProcessLm {
    max_ngram: usize,
    num_chars: usize,
    lambda_factor: f64,
    nodes: Vec<LmNode>,
}

impl NGramProcessLm {
    pub fn new(max_ngram: usize, num_chars: usize, lambda_factor: f64) -> Self {
        Self {
            max_ngram: max_ngram.max(1),
            num_chars: num_chars.max(2),
            lambda_factor,
            nodes: vec![LmNode::new()],
        }
    }

    pub fn with_defaults(max_ngram: usize) -> Self {
        Self::new(max_ngram, DEFAULT_NUM_CHARS, DEFAULT_LAMBDA_FACTOR)
    }

    pub fn max_ngram(&self) -> usize {
        self.max_ngram
    }

    /// Count every n-gram of the text up to the configured order.
    pub fn train(&mut self, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        self.train_chars(&chars);
    }

    pub(crate) fn train_chars(&mut self, chars: &[char]) {
        for i in 0..chars.len() {
            let lo = (i + 1).saturating_sub(self.max_ngram);
            for start in lo..=i {
                self.increment(&chars[start..=i]);
            }
        }
    }

    fn increment(&mut self, seq: &[char]) {
        let mut node = 0usize;
        for &c in seq {
            node = match self.nodes[node].child(c) {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(LmNode::new());
                    let pos = self.nodes[node]
                        .children
                        .binary_search_by_key(&c, |&(ch, _)| ch)
                        .unwrap_err();
                    self.nodes[node].children.insert(pos, (c, child));
                    child
                }
            };
        }
        self.nodes[node].count += 1;
    }

    /// Total outgoing count of a context node.
    fn context_total(&self, node: usize) -> u64 {
        self.nodes[node]
            .children
            .iter()
            .map(|&(_, child)| self.nodes[child].count)
            .sum()
    }

    /// Interpolated probability of `c` after `context` (most recent
    /// context character last).
    fn probability(&self, context: &[char], c: char) -> f64 {
        // Chain of context nodes from the empty context to the longest
        // available suffix of `context`.
        let mut chain = vec![0usize];
        let usable = &context[context.len().saturating_sub(self.max_ngram - 1)..];
        for start in (0..usable.len()).rev() {
            // Walk the suffix usable[start..] from the root.
            let mut node = 0usize;
            let mut found = true;
            for &ctx_char in &usable[start..] {
                match self.nodes[node].child(ctx_char) {
                    Some(child) => node = child,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                chain.push(node);
            } else {
                break;
            }
        }

        let mut p = 1.0 / self.num_chars as f64;
        for &node in &chain {
            let total = self.context_total(node);
            if total == 0 {
                continue; // unseen context: full backoff
            }
            let distinct = self.nodes[node].children.len();
            let lambda =
                total as f64 / (total as f64 + self.lambda_factor * distinct as f64);
            let outcome = self.nodes[node]
                .child(c)
                .map(|child| self.nodes[child].count)
                .unwrap_or(0);
            let ml = outcome as f64 / total as f64;
            p = lambda * ml + (1.0 - lambda) * p;
        }
        p
    }

    /// log2 probability of the whole character sequence as a process.
    pub fn log2_estimate(&self, text: &str) -> f64 {
        let chars: Vec<char> = text.chars().collect();
        self.log2_estimate_chars(&chars)
    }

    pub(crate) fn log2_estimate_chars(&self, chars: &[char]) -> f64 {
        let mut total = 0.0;
        for i in 0..chars.len() {
            let lo = (i + 1).saturating_sub(self.max_ngram);
            total += self.probability(&chars[lo..i], chars[i]).log2();
        }
        total
    }
}

/// A sequence character LM: wraps a process LM with boundary sentinels so
/// estimates normalize over sequences rather than prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NGramBoundaryLm {
    lm: NGramProcessLm,
    boundary: char,
}

impl NGramBoundaryLm {
    pub fn new(max_ngram: usize, num_chars: usize, lambda_factor: f64, boundary: char) -> Self {
        Self {
            lm: NGramProcessLm::new(max_ngram, num_chars, lambda_factor),
            boundary,
        }
    }

    pub fn with_defaults(max_ngram: usize) -> Self {
        Self::new(max_ngram, DEFAULT_NUM_CHARS, DEFAULT_LAMBDA_FACTOR, BOUNDARY_CHAR)
    }

    fn wrap(&self, text: &str) -> Vec<char> {
        let mut chars = Vec::with_capacity(text.chars().count() + 2);
        chars.push(self.boundary);
        chars.extend(text.chars());
        chars.push(self.boundary);
        chars
    }

    pub fn train(&mut self, text: &str) {
        let chars = self.wrap(text);
        self.lm.train_chars(&chars);
    }

    /// log2 probability of the sequence, conditioned on starting at a
    /// boundary and required to end at one.
    pub fn log2_estimate(&self, text: &str) -> f64 {
        let chars = self.wrap(text);
        self.lm.log2_estimate_chars(&chars) - self.lm.log2_estimate_chars(&chars[..1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_normalize_over_seen_alphabet() {
        let mut lm = NGramProcessLm::new(3, 4, 2.0);
        lm.train("abab");
        lm.train("abba");
        // P(next char) sums to <= 1 over any alphabet subset; the uniform
        // remainder covers the rest of the 4-char alphabet.
        let total: f64 = ['a', 'b', 'c', 'd']
            .iter()
            .map(|&c| lm.probability(&['a'], c))
            .sum();
        assert!(total <= 1.0 + 1e-9);
        assert!(total > 0.9, "most mass on the 4-char alphabet: {total}");
    }

    #[test]
    fn test_seen_sequence_more_likely() {
        let mut lm = NGramProcessLm::with_defaults(3);
        for _ in 0..20 {
            lm.train("john");
        }
        assert!(lm.log2_estimate("john") > lm.log2_estimate("xqzv"));
    }

    #[test]
    fn test_longer_context_sharpens() {
        let mut lm = NGramProcessLm::with_defaults(3);
        for _ in 0..50 {
            lm.train("abc");
            lm.train("xbd");
        }
        // After "ab", c is much more likely than d.
        let p_c = lm.probability(&['a', 'b'], 'c');
        let p_d = lm.probability(&['a', 'b'], 'd');
        assert!(p_c > p_d);
    }

    #[test]
    fn test_untrained_model_is_uniform() {
        let lm = NGramProcessLm::new(3, 16, 4.0);
        let p = lm.probability(&[], 'z');
        assert!((p - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_boundary_lm_penalizes_fragments() {
        let mut lm = NGramBoundaryLm::with_defaults(4);
        for _ in 0..30 {
            lm.train("smith");
        }
        // The full trained word outscores a prefix that never ended at a
        // boundary in training.
        assert!(lm.log2_estimate("smith") > lm.log2_estimate("smi"));
    }

    #[test]
    fn test_boundary_lm_estimates_negative() {
        let mut lm = NGramBoundaryLm::with_defaults(3);
        lm.train("abc");
        assert!(lm.log2_estimate("abc") < 0.0);
        assert!(lm.log2_estimate("zzz") < lm.log2_estimate("abc"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut lm = NGramProcessLm::with_defaults(3);
        lm.train("hello world");
        let bytes = bincode::serialize(&lm).unwrap();
        let restored: NGramProcessLm = bincode::deserialize(&bytes).unwrap();
        assert_eq!(
            lm.log2_estimate("hello").to_bits(),
            restored.log2_estimate("hello").to_bits()
        );
    }
}
