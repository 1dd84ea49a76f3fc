//! Trainable token-shape estimator: two count tries built during
//! training, compiled once into the read-only form.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::codec::tags::{to_inner_tag, OUT_TAG, START_TAG, START_TOKEN};
use crate::error::ChunkError;
use crate::tokenizer::TokenCategorizer;

use super::compiled::CompiledEstimator;
use super::node::{SymbolKind, TrainingTrie, ROOT};
use super::symbol::SymbolTable;
use super::trie::EstimatorTrie;

const DEFAULT_LAMBDA_FACTOR: f64 = 4.0;
const DEFAULT_UNIFORM_VOCAB: f64 = 1.0 / 1_000_000.0;

/// Accumulates tag and token context counts; owned by a single training
/// pass and compiled once.
///
/// The tag model keys contexts on `(prev_tag_inner [, prev_token
/// [, prev_prev_token]])` and predicts tags; the token model keys on
/// `(tag [, prev_tag_inner [, prev_token]])` and predicts tokens. Each
/// deeper context node backs off to the one before it.
pub struct TrainableEstimator {
    tag_trie: TrainingTrie,
    token_trie: TrainingTrie,
    tag_symbols: BTreeSet<String>,
    token_symbols: BTreeSet<String>,
    lambda_factor: f64,
    log_uniform_vocab: f64,
    categorizer: Arc<dyn TokenCategorizer>,
}

impl TrainableEstimator {
    pub fn new(categorizer: Arc<dyn TokenCategorizer>) -> Self {
        Self::with_params(
            DEFAULT_LAMBDA_FACTOR,
            DEFAULT_UNIFORM_VOCAB.ln(),
            categorizer,
        )
    }

    pub fn with_params(
        lambda_factor: f64,
        log_uniform_vocab: f64,
        categorizer: Arc<dyn TokenCategorizer>,
    ) -> Self {
        let mut tag_symbols = BTreeSet::new();
        tag_symbols.insert(OUT_TAG.to_string());
        Self {
            tag_trie: TrainingTrie::new(),
            token_trie: TrainingTrie::new(),
            tag_symbols,
            token_symbols: BTreeSet::new(),
            lambda_factor,
            log_uniform_vocab,
            categorizer,
        }
    }

    pub fn set_lambda_factor(&mut self, lambda_factor: f64) -> Result<(), ChunkError> {
        if lambda_factor.is_nan() || lambda_factor.is_infinite() || lambda_factor <= 0.0 {
            return Err(ChunkError::InvalidArgument(format!(
                "lambda factor must be positive and finite, was {lambda_factor}"
            )));
        }
        self.lambda_factor = lambda_factor;
        Ok(())
    }

    pub fn set_log_uniform_vocab(&mut self, estimate: f64) -> Result<(), ChunkError> {
        if estimate.is_nan() || estimate.is_infinite() || estimate >= 0.0 {
            return Err(ChunkError::InvalidArgument(format!(
                "log uniform vocabulary estimate must be negative and finite, was {estimate}"
            )));
        }
        self.log_uniform_vocab = estimate;
        Ok(())
    }

    /// Train on a full token/tag sequence, wiring in the synthetic
    /// start-of-sequence context at both ends.
    pub fn handle(&mut self, tokens: &[String], tags: &[String]) -> Result<(), ChunkError> {
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
        self.train_outcome(
            &tokens[0],
            &tags[0],
            Some(START_TAG),
            Some(START_TOKEN),
            Some(START_TOKEN),
        );
        if tokens.len() < 2 {
            self.train_outcome(
                START_TOKEN,
                START_TAG,
                Some(tags[0].as_str()),
                Some(tokens[0].as_str()),
                Some(START_TOKEN),
            );
            return Ok(());
        }
        self.train_outcome(
            &tokens[1],
            &tags[1],
            Some(tags[0].as_str()),
            Some(tokens[0].as_str()),
            Some(START_TOKEN),
        );
        for i in 2..tokens.len() {
            self.train_outcome(
                &tokens[i],
                &tags[i],
                Some(tags[i - 1].as_str()),
                Some(tokens[i - 1].as_str()),
                Some(tokens[i - 2].as_str()),
            );
        }
        self.train_outcome(
            START_TOKEN,
            START_TAG,
            Some(tags[tags.len() - 1].as_str()),
            Some(tokens[tokens.len() - 1].as_str()),
            Some(tokens[tokens.len() - 2].as_str()),
        );
        Ok(())
    }

    /// Record one observation: `tag` emitting `token` in the given
    /// context. Context tags are reduced to interior form.
    pub fn train_outcome(
        &mut self,
        token: &str,
        tag: &str,
        prev_tag: Option<&str>,
        prev_token: Option<&str>,
        prev_prev_token: Option<&str>,
    ) {
        self.tag_symbols.insert(tag.to_string());
        self.token_symbols.insert(token.to_string());
        let prev_tag_inner = prev_tag.map(to_inner_tag);
        self.train_token_model(token, tag, prev_tag_inner.as_deref(), prev_token);
        self.train_tag_model(tag, prev_tag_inner.as_deref(), prev_token, prev_prev_token);
    }

    fn train_token_model(
        &mut self,
        token: &str,
        tag: &str,
        prev_tag_inner: Option<&str>,
        prev_token: Option<&str>,
    ) {
        self.tag_symbols.insert(tag.to_string());
        let node_tag =
            self.token_trie
                .get_or_create_child(ROOT, tag, SymbolKind::Tag, None);
        self.token_trie.increment_outcome(node_tag, token);
        self.token_symbols.insert(token.to_string());

        let Some(prev_tag_inner) = prev_tag_inner else {
            return;
        };
        self.tag_symbols.insert(prev_tag_inner.to_string());
        let node_prev_tag = self.token_trie.get_or_create_child(
            node_tag,
            prev_tag_inner,
            SymbolKind::Tag,
            Some(node_tag),
        );
        self.token_trie.increment_outcome(node_prev_tag, token);

        let Some(prev_token) = prev_token else {
            return;
        };
        self.token_symbols.insert(prev_token.to_string());
        let node_prev_token = self.token_trie.get_or_create_child(
            node_prev_tag,
            prev_token,
            SymbolKind::Token,
            Some(node_prev_tag),
        );
        self.token_trie.increment_outcome(node_prev_token, token);
    }

    fn train_tag_model(
        &mut self,
        tag: &str,
        prev_tag_inner: Option<&str>,
        prev_token: Option<&str>,
        prev_prev_token: Option<&str>,
    ) {
        let Some(prev_tag_inner) = prev_tag_inner else {
            return;
        };
        self.tag_symbols.insert(prev_tag_inner.to_string());
        let node_tag1 =
            self.tag_trie
                .get_or_create_child(ROOT, prev_tag_inner, SymbolKind::Tag, None);
        self.tag_trie.increment_outcome(node_tag1, tag);
        self.tag_symbols.insert(tag.to_string());

        let Some(prev_token) = prev_token else {
            return;
        };
        self.token_symbols.insert(prev_token.to_string());
        let node_tag1_w1 = self.tag_trie.get_or_create_child(
            node_tag1,
            prev_token,
            SymbolKind::Token,
            Some(node_tag1),
        );
        self.tag_trie.increment_outcome(node_tag1_w1, tag);

        let Some(prev_prev_token) = prev_prev_token else {
            return;
        };
        self.token_symbols.insert(prev_prev_token.to_string());
        let node_tag1_w1_w2 = self.tag_trie.get_or_create_child(
            node_tag1_w1,
            prev_prev_token,
            SymbolKind::Token,
            Some(node_tag1_w1),
        );
        self.tag_trie.increment_outcome(node_tag1_w1_w2, tag);
    }

    /// Drop tag-model and token-model counts below the thresholds.
    pub fn prune(&mut self, tag_threshold: u32, token_threshold: u32) {
        self.tag_trie.prune(tag_threshold);
        self.token_trie.prune(token_threshold);
    }

    /// Add `count` observations of every structurally legal tag pair, so
    /// no legal transition compiles to zero probability.
    pub fn smooth_tags(&mut self, count: u32) {
        let tags: Vec<String> = self.tag_symbols.iter().cloned().collect();
        for tag1 in &tags {
            for tag2 in &tags {
                if crate::codec::tags::illegal_sequence(tag1, tag2) {
                    continue;
                }
                for _ in 0..count {
                    self.train_tag_model(tag2, Some(tag1.as_str()), None, None);
                }
            }
        }
    }

    /// Freeze the counts into the binary-searchable compiled form.
    pub fn compile(&self) -> CompiledEstimator {
        let mut token_symbols = self.token_symbols.clone();
        for category in self.categorizer.categories() {
            token_symbols.insert(category);
        }
        let tag_table = SymbolTable::from_symbols(&self.tag_symbols);
        let token_table = SymbolTable::from_symbols(&token_symbols);
        let tag_trie = EstimatorTrie::compile(
            &self.tag_trie,
            self.lambda_factor,
            &tag_table,
            &token_table,
            SymbolKind::Tag,
        );
        let token_trie = EstimatorTrie::compile(
            &self.token_trie,
            self.lambda_factor,
            &tag_table,
            &token_table,
            SymbolKind::Token,
        );
        debug!(
            tags = tag_table.len(),
            tokens = token_table.len(),
            tag_nodes = tag_trie.num_nodes(),
            token_nodes = token_trie.num_nodes(),
            "compiled estimator"
        );
        CompiledEstimator::from_parts(
            tag_table,
            token_table,
            tag_trie,
            token_trie,
            self.log_uniform_vocab,
            self.categorizer.clone(),
        )
    }
}
