//! Forward/backward tag lattice over a token sequence.
//!
//! All values are natural-log probabilities. A lattice is produced fresh
//! per decode call and is read-only afterwards.

use crate::util::log_sum_exp;

/// Per-position, per-tag forward/backward table with transition scores
/// and the partition function.
///
/// `log_transition(n, from, to)` covers the move from position `n` to
/// `n + 1` and includes the emission of token `n + 1` under `to`, so
/// `forward(n, t) + transition(n, t, u) + backward(n + 1, u)` is the
/// total log mass of paths through that edge.
pub struct TagLattice {
    tags: Vec<String>,
    tokens: Vec<String>,
    log_fwd: Vec<Vec<f64>>,
    log_bwd: Vec<Vec<f64>>,
    log_trans: Vec<Vec<f64>>,
    log_emit: Vec<Vec<f64>>,
    log_z: f64,
}

impl TagLattice {
    /// Build a lattice by the forward-backward algorithm.
    ///
    /// `log_init[t]` scores starting in tag `t` (before emission),
    /// `log_emit[n][t]` scores token `n` under tag `t`, `log_trans` is the
    /// `from`-major transition matrix, and `log_final[t]` scores ending in
    /// tag `t`.
    pub(crate) fn from_scores(
        tokens: Vec<String>,
        tags: Vec<String>,
        log_init: &[f64],
        log_emit: Vec<Vec<f64>>,
        log_trans: Vec<Vec<f64>>,
        log_final: &[f64],
    ) -> Self {
        let num_tokens = tokens.len();
        let num_tags = tags.len();
        let mut log_fwd = vec![vec![f64::NEG_INFINITY; num_tags]; num_tokens];
        let mut log_bwd = vec![vec![f64::NEG_INFINITY; num_tags]; num_tokens];
        let mut buf = vec![f64::NEG_INFINITY; num_tags];

        if num_tokens == 0 {
            return Self {
                tags,
                tokens,
                log_fwd,
                log_bwd,
                log_trans,
                log_emit,
                log_z: 0.0,
            };
        }

        for t in 0..num_tags {
            log_fwd[0][t] = log_init[t] + log_emit[0][t];
        }
        for n in 1..num_tokens {
            for to in 0..num_tags {
                for (from, slot) in buf.iter_mut().enumerate() {
                    *slot = log_fwd[n - 1][from] + log_trans[from][to];
                }
                log_fwd[n][to] = log_sum_exp(&buf) + log_emit[n][to];
            }
        }

        let last = num_tokens - 1;
        log_bwd[last][..num_tags].copy_from_slice(&log_final[..num_tags]);
        for n in (0..last).rev() {
            for from in 0..num_tags {
                for (to, slot) in buf.iter_mut().enumerate() {
                    *slot = log_trans[from][to] + log_emit[n + 1][to] + log_bwd[n + 1][to];
                }
                log_bwd[n][from] = log_sum_exp(&buf);
            }
        }

        for (t, slot) in buf.iter_mut().enumerate() {
            *slot = log_fwd[last][t] + log_final[t];
        }
        let log_z = log_sum_exp(&buf);

        Self {
            tags,
            tokens,
            log_fwd,
            log_bwd,
            log_trans,
            log_emit,
            log_z,
        }
    }

    /// A lattice over no tokens and no tags.
    pub fn empty() -> Self {
        Self {
            tags: Vec::new(),
            tokens: Vec::new(),
            log_fwd: Vec::new(),
            log_bwd: Vec::new(),
            log_trans: Vec::new(),
            log_emit: Vec::new(),
            log_z: 0.0,
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn tag(&self, id: usize) -> &str {
        &self.tags[id]
    }

    pub fn tag_id(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t == tag)
    }

    pub fn log_forward(&self, n: usize, tag: usize) -> f64 {
        self.log_fwd[n][tag]
    }

    pub fn log_backward(&self, n: usize, tag: usize) -> f64 {
        self.log_bwd[n][tag]
    }

    /// Log score of moving from `from` at position `n` to `to` at
    /// `n + 1`, including the emission of token `n + 1`.
    pub fn log_transition(&self, n: usize, from: usize, to: usize) -> f64 {
        self.log_trans[from][to] + self.log_emit[n + 1][to]
    }

    /// Marginal log probability that position `n` carries `tag`.
    pub fn log_probability(&self, n: usize, tag: usize) -> f64 {
        self.log_fwd[n][tag] + self.log_bwd[n][tag] - self.log_z
    }

    pub fn log_z(&self) -> f64 {
        self.log_z
    }
}
