//! Read-only estimator over the compiled tries, with binary model I/O.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::tags::to_inner_tag;
use crate::error::ModelError;
use crate::tokenizer::{ShapeCategorizer, TokenCategorizer};

use super::symbol::SymbolTable;
use super::trie::EstimatorTrie;

const MAGIC: &[u8; 4] = b"SPEM";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = 5;

/// Categorizer id recorded in the binary format. Only the built-in shape
/// categorizer is persistable; other capabilities are re-supplied at load
/// time via `from_bytes_with`.
const CATEGORIZER_SHAPE: u8 = 0;

/// Immutable estimate-time form of the trained estimator.
///
/// Shared read-only across concurrent decode calls; nothing here mutates
/// after construction.
pub struct CompiledEstimator {
    tag_table: SymbolTable,
    token_table: SymbolTable,
    tag_trie: EstimatorTrie,
    token_trie: EstimatorTrie,
    log_uniform_vocab: f64,
    /// Row-major `[tag][prev_tag]` legality table.
    cannot_follow: Vec<bool>,
    to_interior: Vec<Option<usize>>,
    start_ids: Vec<usize>,
    interior_ids: Vec<usize>,
    categorizer: Arc<dyn TokenCategorizer>,
}

#[derive(Serialize, Deserialize)]
struct EstimatorData {
    tag_table: SymbolTable,
    token_table: SymbolTable,
    tag_trie: EstimatorTrie,
    token_trie: EstimatorTrie,
    log_uniform_vocab: f64,
    categorizer_id: u8,
}

impl CompiledEstimator {
    pub(crate) fn from_parts(
        tag_table: SymbolTable,
        token_table: SymbolTable,
        tag_trie: EstimatorTrie,
        token_trie: EstimatorTrie,
        log_uniform_vocab: f64,
        categorizer: Arc<dyn TokenCategorizer>,
    ) -> Self {
        let num_tags = tag_table.len();
        let mut cannot_follow = vec![false; num_tags * num_tags];
        let mut to_interior = vec![None; num_tags];
        let mut start_ids = Vec::new();
        let mut interior_ids = Vec::new();
        for tag_id in 0..num_tags {
            let tag = tag_table.id_to_symbol(tag_id);
            let interior = to_inner_tag(tag);
            let interior_id = tag_table.symbol_to_id(&interior);
            to_interior[tag_id] = interior_id;
            if let Some(interior_id) = interior_id {
                if interior_id != tag_id {
                    start_ids.push(tag_id);
                    interior_ids.push(interior_id);
                }
            }
            for prev_id in 0..num_tags {
                cannot_follow[tag_id * num_tags + prev_id] =
                    crate::codec::tags::illegal_sequence(tag_table.id_to_symbol(prev_id), tag);
            }
        }
        Self {
            tag_table,
            token_table,
            tag_trie,
            token_trie,
            log_uniform_vocab,
            cannot_follow,
            to_interior,
            start_ids,
            interior_ids,
            categorizer,
        }
    }

    pub fn num_tags(&self) -> usize {
        self.tag_table.len()
    }

    pub fn tag_to_id(&self, tag: &str) -> Option<usize> {
        self.tag_table.symbol_to_id(tag)
    }

    pub fn id_to_tag(&self, id: usize) -> &str {
        self.tag_table.id_to_symbol(id)
    }

    pub fn token_to_id(&self, token: &str) -> Option<usize> {
        self.token_table.symbol_to_id(token)
    }

    /// Token id, falling back to the token's category for unknowns.
    pub fn token_or_category_id(&self, token: &str) -> Option<usize> {
        if let Some(id) = self.token_to_id(token) {
            return Some(id);
        }
        let category = self.categorizer.categorize(token);
        let id = self.token_table.symbol_to_id(&category);
        if id.is_none() {
            tracing::warn!(token, category = %category, "token category missing from model");
        }
        id
    }

    /// Whether `tag` may not follow `prev_tag` (interior tag after a
    /// different base type).
    pub fn cannot_follow(&self, tag: usize, prev_tag: usize) -> bool {
        self.cannot_follow[tag * self.num_tags() + prev_tag]
    }

    /// Begin-variant tag ids paired index-wise with `interior_tag_ids`.
    pub fn start_tag_ids(&self) -> &[usize] {
        &self.start_ids
    }

    pub fn interior_tag_ids(&self) -> &[usize] {
        &self.interior_ids
    }

    /// Joint log estimate of `(tag, token)` in context, or NaN when the
    /// transition is structurally illegal or the tag context is missing.
    pub fn estimate(
        &self,
        tag: usize,
        token: Option<usize>,
        prev_tag: usize,
        prev_token: Option<usize>,
        prev_prev_token: Option<usize>,
    ) -> f64 {
        if self.cannot_follow(tag, prev_tag) {
            return f64::NAN;
        }
        let Some(prev_tag_interior) = self.to_interior[prev_tag] else {
            return f64::NAN;
        };
        self.estimate_tag(tag, prev_tag_interior, prev_token, prev_prev_token)
            + self.estimate_token(token, tag, prev_tag_interior, prev_token)
    }

    /// P(tag | context) from the most specific available context node.
    fn estimate_tag(
        &self,
        tag: usize,
        prev_tag_interior: usize,
        prev_token: Option<usize>,
        prev_prev_token: Option<usize>,
    ) -> f64 {
        let Some(node_tag1) = self.tag_trie.lookup_child(Some(prev_tag_interior), 0) else {
            return f64::NAN;
        };
        let Some(node_tag1_w1) = self.tag_trie.lookup_child(prev_token, node_tag1) else {
            return self.tag_trie.estimate_from_node(Some(tag), node_tag1);
        };
        match self.tag_trie.lookup_child(prev_prev_token, node_tag1_w1) {
            None => self.tag_trie.estimate_from_node(Some(tag), node_tag1_w1),
            Some(node_tag1_w1_w2) => {
                self.tag_trie.estimate_from_node(Some(tag), node_tag1_w1_w2)
            }
        }
    }

    /// P(token | tag, context), with the uniform-vocabulary fallback.
    pub(crate) fn estimate_token(
        &self,
        token: Option<usize>,
        tag: usize,
        prev_tag_interior: usize,
        prev_token: Option<usize>,
    ) -> f64 {
        let Some(node_tag) = self.token_trie.lookup_child(Some(tag), 0) else {
            return f64::NAN;
        };
        let Some(node_tag_tag1) = self
            .token_trie
            .lookup_child(Some(prev_tag_interior), node_tag)
        else {
            return self
                .token_trie
                .estimate_from_node_uniform(token, node_tag, self.log_uniform_vocab);
        };
        match self.token_trie.lookup_child(prev_token, node_tag_tag1) {
            Some(node_tag_tag1_w1) => self.token_trie.estimate_from_node_uniform(
                token,
                node_tag_tag1_w1,
                self.log_uniform_vocab,
            ),
            None => self.token_trie.estimate_from_node_uniform(
                token,
                node_tag_tag1,
                self.log_uniform_vocab,
            ),
        }
    }

    /// Token estimate conditioned on the tag alone, without the uniform
    /// fallback; probes the unigram level directly.
    pub fn unigram_token_estimate(&self, token: Option<usize>, tag: usize) -> f64 {
        let Some(node_tag) = self.token_trie.lookup_child(Some(tag), 0) else {
            return f64::NAN;
        };
        self.token_trie.estimate_from_node(token, node_tag)
    }

    // --- binary model I/O ---

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let data = EstimatorData {
            tag_table: self.tag_table.clone(),
            token_table: self.token_table.clone(),
            tag_trie: self.tag_trie.clone(),
            token_trie: self.token_trie.clone(),
            log_uniform_vocab: self.log_uniform_vocab,
            categorizer_id: CATEGORIZER_SHAPE,
        };
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        let encoded = bincode::serialize(&data).map_err(ModelError::Serialize)?;
        buf.extend_from_slice(&encoded);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ModelError> {
        Self::from_bytes_with(data, Arc::new(ShapeCategorizer))
    }

    /// Load with a caller-supplied categorizer capability standing in for
    /// the recorded one.
    pub fn from_bytes_with(
        data: &[u8],
        categorizer: Arc<dyn TokenCategorizer>,
    ) -> Result<Self, ModelError> {
        if data.len() < HEADER_SIZE {
            return Err(ModelError::InvalidHeader);
        }
        if &data[..4] != MAGIC {
            return Err(ModelError::InvalidMagic);
        }
        if data[4] != VERSION {
            return Err(ModelError::UnsupportedVersion(data[4]));
        }
        let decoded: EstimatorData =
            bincode::deserialize(&data[HEADER_SIZE..]).map_err(ModelError::Deserialize)?;
        if decoded.categorizer_id != CATEGORIZER_SHAPE {
            return Err(ModelError::Corrupt(format!(
                "unknown categorizer id {}",
                decoded.categorizer_id
            )));
        }
        if !decoded.tag_table.is_well_formed() || !decoded.token_table.is_well_formed() {
            return Err(ModelError::Corrupt(
                "symbol tables are not sorted and duplicate-free".to_string(),
            ));
        }
        decoded
            .tag_trie
            .validate(decoded.tag_table.len(), decoded.token_table.len())?;
        decoded
            .token_trie
            .validate(decoded.tag_table.len(), decoded.token_table.len())?;
        if decoded.log_uniform_vocab >= 0.0 || decoded.log_uniform_vocab.is_nan() {
            return Err(ModelError::Corrupt(format!(
                "log uniform vocabulary estimate out of range: {}",
                decoded.log_uniform_vocab
            )));
        }
        if decoded
            .tag_table
            .symbol_to_id(crate::codec::tags::OUT_TAG)
            .is_none()
        {
            return Err(ModelError::Corrupt(
                "tag table is missing the out tag".to_string(),
            ));
        }
        Ok(Self::from_parts(
            decoded.tag_table,
            decoded.token_table,
            decoded.tag_trie,
            decoded.token_trie,
            decoded.log_uniform_vocab,
            categorizer,
        ))
    }

    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        Ok(fs::write(path, self.to_bytes()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::TrainableEstimator;

    fn strs(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn trained() -> CompiledEstimator {
        let mut est = TrainableEstimator::new(Arc::new(ShapeCategorizer));
        for _ in 0..4 {
            est.handle(
                &strs(&["John", "smith", "went", "home"]),
                &strs(&["B_PERSON", "I_PERSON", "O", "O"]),
            )
            .unwrap();
        }
        est.smooth_tags(1);
        est.compile()
    }

    #[test]
    fn test_cannot_follow_matches_legality() {
        let est = trained();
        let o = est.tag_to_id("O").unwrap();
        let b = est.tag_to_id("B_PERSON").unwrap();
        let i = est.tag_to_id("I_PERSON").unwrap();
        assert!(est.cannot_follow(i, o)); // I after O is illegal
        assert!(!est.cannot_follow(i, b));
        assert!(!est.cannot_follow(i, i));
        assert!(!est.cannot_follow(b, o));
        assert!(!est.cannot_follow(o, i));
    }

    #[test]
    fn test_start_interior_pairs() {
        let est = trained();
        let starts = est.start_tag_ids();
        let interiors = est.interior_tag_ids();
        assert_eq!(starts.len(), 1);
        assert_eq!(est.id_to_tag(starts[0]), "B_PERSON");
        assert_eq!(est.id_to_tag(interiors[0]), "I_PERSON");
    }

    #[test]
    fn test_illegal_transition_is_nan() {
        let est = trained();
        let o = est.tag_to_id("O").unwrap();
        let i = est.tag_to_id("I_PERSON").unwrap();
        let john = est.token_or_category_id("John");
        assert!(est.estimate(i, john, o, john, john).is_nan());
    }

    #[test]
    fn test_trained_context_scores_higher() {
        let est = trained();
        let b = est.tag_to_id("B_PERSON").unwrap();
        let o = est.tag_to_id("O").unwrap();
        let john = est.token_or_category_id("John");
        let dot = est.token_or_category_id(".");
        // After start-of-sequence, "John" as B_PERSON beats "John" as O.
        let as_person = est.estimate(b, john, o, dot, dot);
        let as_out = est.estimate(o, john, o, dot, dot);
        assert!(as_person.is_finite());
        assert!(as_person > as_out);
    }

    #[test]
    fn test_unknown_token_categorized() {
        let est = trained();
        // Never-seen capitalized token maps to the CAP-CAT category.
        let id = est.token_or_category_id("Zebra");
        assert!(id.is_some());
        assert_eq!(id, est.token_to_id("CAP-CAT"));
    }

    #[test]
    fn test_round_trip_preserves_estimates() {
        let est = trained();
        let bytes = est.to_bytes().unwrap();
        let restored = CompiledEstimator::from_bytes(&bytes).unwrap();
        let b = est.tag_to_id("B_PERSON").unwrap();
        let o = est.tag_to_id("O").unwrap();
        let john = est.token_or_category_id("John");
        let dot = est.token_or_category_id(".");
        let before = est.estimate(b, john, o, dot, dot);
        let after = restored.estimate(b, john, o, dot, dot);
        assert_eq!(before.to_bits(), after.to_bits());
        assert_eq!(est.num_tags(), restored.num_tags());
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(matches!(
            CompiledEstimator::from_bytes(b"XXXX\x01rest"),
            Err(ModelError::InvalidMagic)
        ));
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            CompiledEstimator::from_bytes(b"SPE"),
            Err(ModelError::InvalidHeader)
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        assert!(matches!(
            CompiledEstimator::from_bytes(b"SPEM\x63rest"),
            Err(ModelError::UnsupportedVersion(0x63))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let est = trained();
        let bytes = est.to_bytes().unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            CompiledEstimator::from_bytes(truncated),
            Err(ModelError::Deserialize(_) | ModelError::Corrupt(_))
        ));
    }

    #[test]
    fn test_save_open_round_trip() {
        let dir = std::env::temp_dir().join("span_engine_test_estimator");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.spem");

        let est = trained();
        est.save(&path).unwrap();
        let restored = CompiledEstimator::open(&path).unwrap();
        assert_eq!(est.num_tags(), restored.num_tags());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_nonexistent() {
        assert!(matches!(
            CompiledEstimator::open(Path::new("/nonexistent/model.spem")),
            Err(ModelError::Io(_))
        ));
    }
}
