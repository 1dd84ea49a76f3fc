//! Trainable HMM with character-LM emissions, and its compiled form.
//!
//! Transitions, starts and ends are frequency counts over tag sequences;
//! emissions are per-tag boundary character LMs, so unseen tokens still
//! receive usable probability mass from their character shape.

use std::collections::BTreeMap;
use std::f64::consts::LN_2;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChunkError, ModelError};
use crate::lm::NGramBoundaryLm;

const MAGIC: &[u8; 4] = b"SPHM";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = 5;

const DEFAULT_NGRAM: usize = 5;
const DEFAULT_NUM_CHARS: usize = 256;
const DEFAULT_LAMBDA_FACTOR: f64 = 4.0;

/// Accumulates HMM statistics from tagged token sequences.
pub struct HmmTrainer {
    max_ngram: usize,
    num_chars: usize,
    lambda_factor: f64,
    smooth_transitions: bool,
    emission_lms: BTreeMap<String, NGramBoundaryLm>,
    transition_counts: BTreeMap<(String, String), u64>,
    init_counts: BTreeMap<String, u64>,
    final_counts: BTreeMap<String, u64>,
}

impl HmmTrainer {
    pub fn new(smooth_transitions: bool) -> Self {
        Self::with_params(
            DEFAULT_NGRAM,
            DEFAULT_NUM_CHARS,
            DEFAULT_LAMBDA_FACTOR,
            smooth_transitions,
        )
    }

    pub fn with_params(
        max_ngram: usize,
        num_chars: usize,
        lambda_factor: f64,
        smooth_transitions: bool,
    ) -> Self {
        Self {
            max_ngram,
            num_chars,
            lambda_factor,
            smooth_transitions,
            emission_lms: BTreeMap::new(),
            transition_counts: BTreeMap::new(),
            init_counts: BTreeMap::new(),
            final_counts: BTreeMap::new(),
        }
    }

    fn emission_lm(&mut self, tag: &str) -> &mut NGramBoundaryLm {
        let (max_ngram, num_chars, lambda_factor) =
            (self.max_ngram, self.num_chars, self.lambda_factor);
        self.emission_lms.entry(tag.to_string()).or_insert_with(|| {
            NGramBoundaryLm::new(
                max_ngram,
                num_chars,
                lambda_factor,
                crate::lm::BOUNDARY_CHAR,
            )
        })
    }

    /// Count one tagged sequence: start, transitions, end, and one
    /// emission observation per token.
    pub fn train(&mut self, tokens: &[String], tags: &[String]) -> Result<(), ChunkError> {
        if tokens.len() != tags.len() {
            return Err(ChunkError::InvalidArgument(format!(
                "tokens and tags must be the same length, got {} and {}",
                tokens.len(),
                tags.len()
            )));
        }
        if tokens.is_empty() {
            return Ok(());
        }
        *self.init_counts.entry(tags[0].clone()).or_insert(0) += 1;
        for i in 1..tags.len() {
            *self
                .transition_counts
                .entry((tags[i - 1].clone(), tags[i].clone()))
                .or_insert(0) += 1;
        }
        *self
            .final_counts
            .entry(tags[tags.len() - 1].clone())
            .or_insert(0) += 1;
        for (token, tag) in tokens.iter().zip(tags.iter()) {
            self.emission_lm(tag).train(token);
        }
        Ok(())
    }

    /// Extra emission training for a tag, without sequence context.
    pub fn train_emission(&mut self, tag: &str, token: &str) {
        self.emission_lm(tag).train(token);
    }

    /// Freeze counts into log-space matrices. Structurally illegal tag
    /// pairs stay at minus infinity even when smoothing is on, so decode
    /// output is always a legal sequence.
    pub fn compile(&self) -> HmmModel {
        let mut tag_set: BTreeMap<String, ()> = BTreeMap::new();
        for tag in self.emission_lms.keys() {
            tag_set.insert(tag.clone(), ());
        }
        let tags: Vec<String> = tag_set.into_keys().collect();
        let num_tags = tags.len();

        let smoothing = |legal: bool| -> u64 {
            if self.smooth_transitions && legal {
                1
            } else {
                0
            }
        };

        let mut init_counts = vec![0u64; num_tags];
        let mut final_counts = vec![0u64; num_tags];
        let mut trans_counts = vec![vec![0u64; num_tags]; num_tags];
        for (i, tag) in tags.iter().enumerate() {
            // An interior tag cannot open a sequence.
            init_counts[i] = self.init_counts.get(tag).copied().unwrap_or(0)
                + smoothing(!crate::codec::tags::is_inner_tag(tag));
            final_counts[i] = self.final_counts.get(tag).copied().unwrap_or(0) + smoothing(true);
            for (j, next) in tags.iter().enumerate() {
                trans_counts[i][j] = self
                    .transition_counts
                    .get(&(tag.clone(), next.clone()))
                    .copied()
                    .unwrap_or(0)
                    + smoothing(!crate::codec::tags::illegal_sequence(tag, next));
            }
        }

        let normalize = |counts: &[u64]| -> Vec<f64> {
            let total: u64 = counts.iter().sum();
            counts
                .iter()
                .map(|&c| {
                    if c == 0 || total == 0 {
                        f64::NEG_INFINITY
                    } else {
                        (c as f64 / total as f64).ln()
                    }
                })
                .collect()
        };

        let log_init = normalize(&init_counts);
        let log_final = normalize(&final_counts);
        let log_trans: Vec<Vec<f64>> = trans_counts.iter().map(|row| normalize(row)).collect();
        let emission_lms: Vec<NGramBoundaryLm> = tags
            .iter()
            .map(|tag| self.emission_lms[tag].clone())
            .collect();

        debug!(tags = num_tags, "compiled hmm model");
        HmmModel {
            tags,
            log_init,
            log_trans,
            log_final,
            emission_lms,
        }
    }
}

/// Immutable HMM: tag inventory, log transition structure and per-tag
/// emission LMs. Shared read-only across decode calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmmModel {
    tags: Vec<String>,
    log_init: Vec<f64>,
    log_trans: Vec<Vec<f64>>,
    log_final: Vec<f64>,
    emission_lms: Vec<NGramBoundaryLm>,
}

impl HmmModel {
    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn tag_id(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|t| t == tag)
    }

    pub(crate) fn log_init(&self) -> &[f64] {
        &self.log_init
    }

    pub(crate) fn log_final(&self) -> &[f64] {
        &self.log_final
    }

    pub(crate) fn log_trans(&self) -> &[Vec<f64>] {
        &self.log_trans
    }

    /// Natural-log emission probability of `token` under tag `id`.
    pub fn log_emit(&self, id: usize, token: &str) -> f64 {
        self.emission_lms[id].log2_estimate(token) * LN_2
    }

    // --- binary model I/O ---

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        let encoded = bincode::serialize(self).map_err(ModelError::Serialize)?;
        buf.extend_from_slice(&encoded);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ModelError> {
        if data.len() < HEADER_SIZE {
            return Err(ModelError::InvalidHeader);
        }
        if &data[..4] != MAGIC {
            return Err(ModelError::InvalidMagic);
        }
        if data[4] != VERSION {
            return Err(ModelError::UnsupportedVersion(data[4]));
        }
        let model: HmmModel =
            bincode::deserialize(&data[HEADER_SIZE..]).map_err(ModelError::Deserialize)?;
        let n = model.tags.len();
        if model.log_init.len() != n
            || model.log_final.len() != n
            || model.log_trans.len() != n
            || model.log_trans.iter().any(|row| row.len() != n)
            || model.emission_lms.len() != n
        {
            return Err(ModelError::Corrupt(
                "hmm arrays do not match the tag inventory".to_string(),
            ));
        }
        let invalid = |x: f64| x.is_nan() || x > 0.0;
        if model.log_init.iter().any(|&x| invalid(x))
            || model.log_final.iter().any(|&x| invalid(x))
            || model.log_trans.iter().flatten().any(|&x| invalid(x))
        {
            return Err(ModelError::Corrupt(
                "hmm log probabilities out of range".to_string(),
            ));
        }
        Ok(model)
    }

    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        Ok(fs::write(path, self.to_bytes()?)?)
    }
}
