//! HMM decoding: first-best Viterbi, best-first n-best taggings, and the
//! marginal lattice.

use std::sync::Arc;

use crate::error::ChunkError;
use crate::tagging::Tagging;
use crate::util::{ln_to_log2, BoundedPriorityQueue};

use super::lattice::TagLattice;
use super::model::HmmModel;

/// A complete tagging with a base-2 log joint score.
#[derive(Debug, Clone)]
pub struct ScoredTagging {
    pub tags: Vec<String>,
    pub score: f64,
}

pub struct HmmDecoder {
    model: Arc<HmmModel>,
}

impl HmmDecoder {
    pub fn new(model: Arc<HmmModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &HmmModel {
        &self.model
    }

    fn emissions(&self, tokens: &[String]) -> Vec<Vec<f64>> {
        let model = self.model.as_ref();
        tokens
            .iter()
            .map(|token| {
                (0..model.num_tags())
                    .map(|t| model.log_emit(t, token))
                    .collect()
            })
            .collect()
    }

    /// First-best tag sequence by Viterbi.
    pub fn tag(&self, tokens: &[String]) -> Result<Tagging, ChunkError> {
        if tokens.is_empty() {
            return Tagging::new(Vec::new(), Vec::new());
        }
        let model = self.model.as_ref();
        let num_tags = model.num_tags();
        if num_tags == 0 {
            return Err(ChunkError::InvalidArgument(
                "hmm model has no tags".to_string(),
            ));
        }
        let emit = self.emissions(tokens);
        let n = tokens.len();
        let mut best = vec![vec![f64::NEG_INFINITY; num_tags]; n];
        let mut back = vec![vec![0usize; num_tags]; n];
        for t in 0..num_tags {
            best[0][t] = model.log_init()[t] + emit[0][t];
        }
        for i in 1..n {
            for to in 0..num_tags {
                let mut best_score = f64::NEG_INFINITY;
                let mut best_prev = 0;
                for from in 0..num_tags {
                    let score = best[i - 1][from] + model.log_trans()[from][to];
                    if score > best_score {
                        best_score = score;
                        best_prev = from;
                    }
                }
                best[i][to] = best_score + emit[i][to];
                back[i][to] = best_prev;
            }
        }
        let mut last_tag = 0;
        let mut last_score = f64::NEG_INFINITY;
        for t in 0..num_tags {
            let score = best[n - 1][t] + model.log_final()[t];
            if score > last_score {
                last_score = score;
                last_tag = t;
            }
        }
        let mut tag_ids = vec![0usize; n];
        tag_ids[n - 1] = last_tag;
        for i in (1..n).rev() {
            tag_ids[i - 1] = back[i][tag_ids[i]];
        }
        let tags = tag_ids
            .into_iter()
            .map(|t| model.tags()[t].clone())
            .collect();
        Tagging::new(tokens.to_vec(), tags)
    }

    /// Lazy n-best taggings in non-increasing score order.
    pub fn tag_n_best(
        &self,
        tokens: &[String],
        max_n_best: usize,
    ) -> Result<NBestTaggingIter<'_>, ChunkError> {
        if max_n_best < 1 {
            return Err(ChunkError::InvalidArgument(format!(
                "max n-best must be at least 1, was {max_n_best}"
            )));
        }
        Ok(NBestTaggingIter::new(
            self.model.as_ref(),
            tokens,
            max_n_best,
        ))
    }

    /// Forward/backward marginal lattice over the tokens.
    pub fn tag_marginal(&self, tokens: &[String]) -> TagLattice {
        let model = self.model.as_ref();
        TagLattice::from_scores(
            tokens.to_vec(),
            model.tags().to_vec(),
            model.log_init(),
            self.emissions(tokens),
            model.log_trans().to_vec(),
            model.log_final(),
        )
    }
}

/// Best-first search over partial taggings.
///
/// Each queue entry carries the exact score of its best completion
/// (prefix score plus a precomputed suffix-Viterbi bound), so complete
/// taggings pop in non-increasing final-score order and the first one
/// equals the Viterbi best.
pub struct NBestTaggingIter<'a> {
    model: &'a HmmModel,
    tokens: Vec<String>,
    emit: Vec<Vec<f64>>,
    /// Best log score from `(pos, tag)` through the end of the sequence.
    suffix_best: Vec<Vec<f64>>,
    queue: BoundedPriorityQueue<Partial>,
    arena: Vec<(usize, Option<usize>)>,
    max_n_best: usize,
    emitted: usize,
    empty_emitted: bool,
}

struct Partial {
    pos: usize,
    tag: usize,
    prefix_score: f64,
    history: usize,
}

impl<'a> NBestTaggingIter<'a> {
    fn new(model: &'a HmmModel, tokens: &[String], max_n_best: usize) -> Self {
        let num_tags = model.num_tags();
        let n = tokens.len();
        let emit: Vec<Vec<f64>> = tokens
            .iter()
            .map(|token| (0..num_tags).map(|t| model.log_emit(t, token)).collect())
            .collect();

        let mut suffix_best = vec![vec![f64::NEG_INFINITY; num_tags]; n];
        if n > 0 {
            suffix_best[n - 1][..num_tags].copy_from_slice(&model.log_final()[..num_tags]);
            for i in (0..n - 1).rev() {
                for from in 0..num_tags {
                    let mut best = f64::NEG_INFINITY;
                    for to in 0..num_tags {
                        let score =
                            model.log_trans()[from][to] + emit[i + 1][to] + suffix_best[i + 1][to];
                        if score > best {
                            best = score;
                        }
                    }
                    suffix_best[i][from] = best;
                }
            }
        }

        let mut iter = Self {
            model,
            tokens: tokens.to_vec(),
            emit,
            suffix_best,
            queue: BoundedPriorityQueue::new(max_n_best),
            arena: Vec::new(),
            max_n_best,
            emitted: 0,
            empty_emitted: false,
        };
        if n > 0 {
            for tag in 0..num_tags {
                let prefix = iter.model.log_init()[tag] + iter.emit[0][tag];
                iter.push(0, tag, prefix, None);
            }
        }
        iter
    }

    fn push(&mut self, pos: usize, tag: usize, prefix_score: f64, prev: Option<usize>) {
        let priority = prefix_score + self.suffix_best[pos][tag];
        if priority == f64::NEG_INFINITY || priority.is_nan() {
            return;
        }
        self.arena.push((tag, prev));
        let history = self.arena.len() - 1;
        self.queue.offer(
            priority,
            Partial {
                pos,
                tag,
                prefix_score,
                history,
            },
        );
    }

    fn backtrace(&self, mut history: usize) -> Vec<String> {
        let mut tags = Vec::new();
        loop {
            let (tag, prev) = self.arena[history];
            tags.push(self.model.tags()[tag].clone());
            match prev {
                Some(prev) => history = prev,
                None => break,
            }
        }
        tags.reverse();
        tags
    }
}

impl Iterator for NBestTaggingIter<'_> {
    type Item = ScoredTagging;

    fn next(&mut self) -> Option<ScoredTagging> {
        if self.emitted >= self.max_n_best {
            return None;
        }
        if self.tokens.is_empty() {
            if self.empty_emitted {
                return None;
            }
            self.empty_emitted = true;
            self.emitted += 1;
            return Some(ScoredTagging {
                tags: Vec::new(),
                score: 0.0,
            });
        }
        let last = self.tokens.len() - 1;
        while let Some((_, partial)) = self.queue.poll() {
            if partial.pos == last {
                self.emitted += 1;
                let score = partial.prefix_score + self.model.log_final()[partial.tag];
                return Some(ScoredTagging {
                    tags: self.backtrace(partial.history),
                    score: ln_to_log2(score),
                });
            }
            for tag in 0..self.model.num_tags() {
                let step = self.model.log_trans()[partial.tag][tag] + self.emit[partial.pos + 1][tag];
                if step == f64::NEG_INFINITY {
                    continue;
                }
                self.push(
                    partial.pos + 1,
                    tag,
                    partial.prefix_score + step,
                    Some(partial.history),
                );
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::HmmTrainer;

    fn strs(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn decoder() -> HmmDecoder {
        let mut trainer = HmmTrainer::new(true);
        for _ in 0..6 {
            trainer
                .train(
                    &strs(&["John", "smith", "went", "home"]),
                    &strs(&["B_PERSON", "I_PERSON", "O", "O"]),
                )
                .unwrap();
            trainer
                .train(
                    &strs(&["the", "dog", "ran", "home"]),
                    &strs(&["O", "O", "O", "O"]),
                )
                .unwrap();
        }
        HmmDecoder::new(Arc::new(trainer.compile()))
    }

    #[test]
    fn test_viterbi_recovers_training_tags() {
        let decoder = decoder();
        let tagging = decoder
            .tag(&strs(&["John", "smith", "went", "home"]))
            .unwrap();
        assert_eq!(tagging.tags(), &["B_PERSON", "I_PERSON", "O", "O"]);
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = decoder();
        assert!(decoder.tag(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_n_best_first_matches_viterbi() {
        let decoder = decoder();
        let tokens = strs(&["John", "smith", "went", "home"]);
        let viterbi = decoder.tag(&tokens).unwrap();
        let first = decoder
            .tag_n_best(&tokens, 5)
            .unwrap()
            .next()
            .expect("at least one tagging");
        assert_eq!(first.tags, viterbi.tags());
    }

    #[test]
    fn test_n_best_scores_non_increasing() {
        let decoder = decoder();
        let tokens = strs(&["John", "smith", "went", "home"]);
        let results: Vec<ScoredTagging> =
            decoder.tag_n_best(&tokens, 8).unwrap().collect();
        assert!(results.len() > 1);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_n_best_taggings_distinct_and_legal() {
        let decoder = decoder();
        let tokens = strs(&["John", "smith", "went", "home"]);
        let results: Vec<ScoredTagging> =
            decoder.tag_n_best(&tokens, 8).unwrap().collect();
        for r in &results {
            assert_eq!(r.tags.len(), tokens.len());
            for pair in r.tags.windows(2) {
                assert!(!crate::codec::tags::illegal_sequence(&pair[0], &pair[1]));
            }
        }
        let mut seen: Vec<&Vec<String>> = Vec::new();
        for r in &results {
            assert!(!seen.contains(&&r.tags), "duplicate tagging {:?}", r.tags);
            seen.push(&r.tags);
        }
    }

    #[test]
    fn test_n_best_zero_rejected() {
        let decoder = decoder();
        assert!(matches!(
            decoder.tag_n_best(&strs(&["a"]), 0),
            Err(ChunkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_n_best_empty_input_yields_empty_tagging() {
        let decoder = decoder();
        let results: Vec<ScoredTagging> = decoder.tag_n_best(&[], 3).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].tags.is_empty());
    }

    #[test]
    fn test_marginal_lattice_prefers_person_start() {
        let decoder = decoder();
        let tokens = strs(&["John", "smith", "went", "home"]);
        let lattice = decoder.tag_marginal(&tokens);
        let b = lattice.tag_id("B_PERSON").unwrap();
        let o = lattice.tag_id("O").unwrap();
        assert!(lattice.log_probability(0, b) > lattice.log_probability(0, o));
        // Marginals at each position sum to one.
        for n in 0..tokens.len() {
            let total: f64 = (0..lattice.num_tags())
                .map(|t| lattice.log_probability(n, t).exp())
                .sum();
            assert!((total - 1.0).abs() < 1e-6, "position {n}: {total}");
        }
    }
}
