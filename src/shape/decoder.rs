//! Beam-pruned approximate Viterbi decoder over the compiled estimator.
//!
//! At each step the decoder keeps at most one survivor per tag id, linked
//! to its best predecessor through an arena of history entries, then
//! applies the begin/interior exclusion rule and the beam. The outside
//! tag is exempt from pruning and synthesized when absent, so decoding
//! never dead-ends; if it somehow does, the caller receives an
//! all-outside tagging.

use std::f64::consts::LN_2;
use std::sync::Arc;

use tracing::warn;

use crate::codec::tags::{OUT_TAG, START_TAG, START_TOKEN};
use crate::estimator::CompiledEstimator;

/// One survivor in the backtrace arena. Discarded branches are simply
/// never referenced again; the arena is dropped whole after decoding.
struct HistoryEntry {
    tag: usize,
    prev: Option<usize>,
}

pub struct TokenShapeDecoder {
    estimator: Arc<CompiledEstimator>,
    log2_beam: f64,
}

impl TokenShapeDecoder {
    pub fn new(estimator: Arc<CompiledEstimator>, log2_beam: f64) -> Self {
        Self {
            estimator,
            log2_beam,
        }
    }

    pub(crate) fn set_log2_beam(&mut self, log2_beam: f64) {
        self.log2_beam = log2_beam;
    }

    pub fn estimator(&self) -> &CompiledEstimator {
        &self.estimator
    }

    /// Best tag per token. Falls back to an all-outside tagging when no
    /// path survives.
    pub fn decode_tags(&self, tokens: &[String]) -> Vec<String> {
        if tokens.is_empty() {
            return Vec::new();
        }
        match self.decode(tokens) {
            Some((arena, best)) => {
                let mut result = vec![String::new(); tokens.len()];
                let mut current = Some(best);
                for slot in result.iter_mut().rev() {
                    let entry = &arena[current.expect("history covers every token")];
                    *slot = self.estimator.id_to_tag(entry.tag).to_string();
                    current = entry.prev;
                }
                result
            }
            None => {
                warn!(tokens = tokens.len(), "beam collapsed, emitting all-outside tagging");
                vec![OUT_TAG.to_string(); tokens.len()]
            }
        }
    }

    fn decode(&self, tokens: &[String]) -> Option<(Vec<HistoryEntry>, usize)> {
        let est = self.estimator.as_ref();
        let num_tags = est.num_tags();
        let start_tag = est.tag_to_id(START_TAG)?;
        let out_tag = est.tag_to_id(OUT_TAG)?;
        let start_token = est.token_to_id(START_TOKEN);

        let mut arena: Vec<HistoryEntry> = Vec::with_capacity(tokens.len() * num_tags);
        let mut history: Vec<Option<usize>> = vec![None; num_tags];
        let mut scores = vec![f64::NAN; num_tags];
        let mut next_history: Vec<Option<usize>> = vec![None; num_tags];
        let mut next_scores = vec![f64::NAN; num_tags];

        let mut token_minus_1 = start_token;
        let mut token_minus_2 = start_token;

        let mut token_id = est.token_or_category_id(&tokens[0]);
        for tag in 0..num_tags {
            if est.cannot_follow(tag, start_tag) {
                continue;
            }
            let score = est.estimate(tag, token_id, start_tag, token_minus_1, token_minus_2);
            if score.is_nan() {
                continue;
            }
            scores[tag] = score;
            arena.push(HistoryEntry { tag, prev: None });
            history[tag] = Some(arena.len() - 1);
        }

        for token in &tokens[1..] {
            token_minus_2 = token_minus_1;
            token_minus_1 = token_id;
            token_id = est.token_or_category_id(token);

            for tag in 0..num_tags {
                let mut best_prev = None;
                let mut best_score = f64::NAN;
                for prev_tag in 0..num_tags {
                    let Some(prev_hist) = history[prev_tag] else {
                        continue;
                    };
                    if est.cannot_follow(tag, prev_tag) {
                        continue;
                    }
                    let estimate =
                        est.estimate(tag, token_id, prev_tag, token_minus_1, token_minus_2);
                    if estimate.is_nan() {
                        continue;
                    }
                    let score = estimate + scores[prev_tag];
                    if best_prev.is_none() || score > best_score {
                        best_prev = Some(prev_hist);
                        best_score = score;
                    }
                }
                match best_prev {
                    None => {
                        next_history[tag] = None;
                        next_scores[tag] = f64::NAN;
                    }
                    Some(prev_hist) => {
                        arena.push(HistoryEntry {
                            tag,
                            prev: Some(prev_hist),
                        });
                        next_history[tag] = Some(arena.len() - 1);
                        next_scores[tag] = best_score;
                    }
                }
            }

            // Begin/interior exclusion: a token cannot both start and
            // continue a chunk of the same type; only the better branch
            // survives.
            for (&begin, &interior) in est
                .start_tag_ids()
                .iter()
                .zip(est.interior_tag_ids().iter())
            {
                if next_history[begin].is_none() || next_history[interior].is_none() {
                    continue;
                }
                if next_scores[begin] > next_scores[interior] {
                    next_history[interior] = None;
                    next_scores[interior] = f64::NAN;
                } else {
                    next_history[begin] = None;
                    next_scores[begin] = f64::NAN;
                }
            }

            let mut best_score = f64::NAN;
            let mut best_history = None;
            for tag in 0..num_tags {
                if next_history[tag].is_none() {
                    continue;
                }
                if best_score.is_nan() || next_scores[tag] > best_score {
                    best_score = next_scores[tag];
                    best_history = next_history[tag];
                }
            }

            let worst_to_keep = best_score - self.log2_beam * LN_2;
            for tag in 0..num_tags {
                if tag == out_tag {
                    // The outside tag is never pruned; when absent it is
                    // synthesized onto the best survivor's predecessor.
                    if next_history[out_tag].is_none() {
                        if let Some(best_hist) = best_history {
                            let prev = arena[best_hist].prev;
                            arena.push(HistoryEntry { tag: out_tag, prev });
                            next_history[out_tag] = Some(arena.len() - 1);
                            if next_scores[out_tag].is_nan()
                                || next_scores[out_tag].is_infinite()
                            {
                                next_scores[out_tag] = best_score;
                            }
                        }
                    }
                    continue;
                }
                if next_history[tag].is_none() {
                    continue;
                }
                if next_scores[tag] < worst_to_keep {
                    next_history[tag] = None;
                    next_scores[tag] = f64::NAN;
                }
            }

            if next_history.iter().all(Option::is_none) {
                return None;
            }

            std::mem::swap(&mut history, &mut next_history);
            std::mem::swap(&mut scores, &mut next_scores);
            next_history.fill(None);
            next_scores.fill(f64::NAN);
        }

        let mut best = None;
        for tag in 0..num_tags {
            let Some(hist) = history[tag] else { continue };
            match best {
                None => best = Some((hist, scores[tag])),
                Some((_, best_score)) if scores[tag] > best_score => {
                    best = Some((hist, scores[tag]))
                }
                _ => {}
            }
        }
        best.map(|(hist, _)| (arena, hist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::TrainableEstimator;
    use crate::tokenizer::ShapeCategorizer;

    fn strs(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn trained_decoder(log2_beam: f64) -> TokenShapeDecoder {
        let mut est = TrainableEstimator::new(Arc::new(ShapeCategorizer));
        for _ in 0..8 {
            est.handle(
                &strs(&["John", "smith", "went", "home"]),
                &strs(&["B_PERSON", "I_PERSON", "O", "O"]),
            )
            .unwrap();
            est.handle(
                &strs(&["the", "dog", "ran", "home"]),
                &strs(&["O", "O", "O", "O"]),
            )
            .unwrap();
        }
        est.smooth_tags(1);
        TokenShapeDecoder::new(Arc::new(est.compile()), log2_beam)
    }

    #[test]
    fn test_decodes_trained_sequence() {
        let decoder = trained_decoder(1000.0);
        let tags = decoder.decode_tags(&strs(&["John", "smith", "went", "home"]));
        assert_eq!(tags, strs(&["B_PERSON", "I_PERSON", "O", "O"]));
    }

    #[test]
    fn test_all_out_sequence() {
        let decoder = trained_decoder(1000.0);
        let tags = decoder.decode_tags(&strs(&["the", "dog", "ran", "home"]));
        assert_eq!(tags, strs(&["O", "O", "O", "O"]));
    }

    #[test]
    fn test_empty_input() {
        let decoder = trained_decoder(1000.0);
        assert!(decoder.decode_tags(&[]).is_empty());
    }

    #[test]
    fn test_output_always_legal() {
        let decoder = trained_decoder(1000.0);
        for input in [
            strs(&["smith", "went"]),
            strs(&["Zebra", "Quux", "!"]),
            strs(&["home"]),
        ] {
            let tags = decoder.decode_tags(&input);
            assert_eq!(tags.len(), input.len());
            for pair in tags.windows(2) {
                assert!(
                    !crate::codec::tags::illegal_sequence(&pair[0], &pair[1]),
                    "illegal pair {pair:?} for input {input:?}"
                );
            }
            assert!(!crate::codec::tags::is_inner_tag(&tags[0]));
        }
    }

    #[test]
    fn test_unknown_tokens_decode_via_categories() {
        let decoder = trained_decoder(1000.0);
        // Shape-alike of the training data: Cap cap low low.
        let tags = decoder.decode_tags(&strs(&["Xqzt", "vwxy", "went", "home"]));
        assert_eq!(tags.len(), 4);
    }

    #[test]
    fn test_beam_monotonicity() {
        // A narrower beam can only drop the optimum, never improve it.
        let narrow = trained_decoder(1e-6);
        let wide = trained_decoder(1000.0);
        let input = strs(&["John", "smith", "went", "home"]);
        let narrow_tags = narrow.decode_tags(&input);
        let wide_tags = wide.decode_tags(&input);
        let score = |decoder: &TokenShapeDecoder, tags: &[String]| -> f64 {
            let est = decoder.estimator();
            let start = est.tag_to_id(START_TAG).unwrap();
            let dot = est.token_to_id(START_TOKEN);
            let mut prev_tag = start;
            let (mut tm1, mut tm2) = (dot, dot);
            let mut total = 0.0;
            for (i, tag) in tags.iter().enumerate() {
                let tag_id = est.tag_to_id(tag).unwrap();
                let tok = est.token_or_category_id(&input[i]);
                total += est.estimate(tag_id, tok, prev_tag, tm1, tm2);
                prev_tag = tag_id;
                tm2 = tm1;
                tm1 = tok;
            }
            total
        };
        let narrow_score = score(&narrow, &narrow_tags);
        let wide_score = score(&wide, &wide_tags);
        assert!(
            narrow_score <= wide_score + 1e-9,
            "narrow beam must not beat the wide beam: {narrow_score} vs {wide_score}"
        );
    }
}
