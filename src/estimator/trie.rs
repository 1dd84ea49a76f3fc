//! Read-only compiled form of the training trie: parallel arrays in
//! breadth-first order with binary-searched child and outcome ranges.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

use super::node::{SymbolKind, TrainingTrie, ROOT};
use super::symbol::SymbolTable;

/// Node `i`'s children occupy `first_child[i]..first_child[i + 1]` and its
/// outcomes `first_outcome[i]..first_outcome[i + 1]`; both ranges are
/// sorted by symbol id. `backoff[i]` is a node index or -1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EstimatorTrie {
    node_symbol: Vec<i64>,
    node_first_outcome: Vec<u32>,
    node_first_child: Vec<u32>,
    node_log_one_minus_lambda: Vec<f32>,
    node_backoff: Vec<i64>,
    outcome_symbol: Vec<u32>,
    outcome_log_estimate: Vec<f32>,
}

impl EstimatorTrie {
    /// Serialize a training trie: index nodes breadth-first, fix the
    /// interpolated log estimates and `ln(1 - lambda)` weights.
    pub fn compile(
        trie: &TrainingTrie,
        lambda_factor: f64,
        tag_table: &SymbolTable,
        token_table: &SymbolTable,
        outcome_kind: SymbolKind,
    ) -> Self {
        let order = trie.bfs_order();
        let mut index_of = vec![usize::MAX; order.iter().max().map_or(0, |&m| m + 1)];
        for (idx, &id) in order.iter().enumerate() {
            index_of[id] = idx;
        }

        fn table_for<'t>(
            kind: SymbolKind,
            tag_table: &'t SymbolTable,
            token_table: &'t SymbolTable,
        ) -> &'t SymbolTable {
            match kind {
                SymbolKind::Tag => tag_table,
                SymbolKind::Token => token_table,
            }
        }
        let outcome_table = table_for(outcome_kind, tag_table, token_table);

        let num_nodes = order.len();
        let mut node_symbol = Vec::with_capacity(num_nodes);
        let mut node_first_outcome = Vec::with_capacity(num_nodes + 1);
        let mut node_first_child = Vec::with_capacity(num_nodes + 1);
        let mut node_log_one_minus_lambda = Vec::with_capacity(num_nodes);
        let mut node_backoff = Vec::with_capacity(num_nodes);
        let mut outcome_symbol = Vec::new();
        let mut outcome_log_estimate = Vec::new();

        let mut outcome_index = 0u32;
        let mut child_index = 1u32; // root occupies index 0
        for &id in &order {
            let node = trie.node(id);
            let symbol_id = match &node.symbol {
                None => -1,
                Some(symbol) => table_for(node.kind, tag_table, token_table)
                    .symbol_to_id(symbol)
                    .map(|i| i as i64)
                    .unwrap_or(-1),
            };
            node_symbol.push(symbol_id);
            node_first_outcome.push(outcome_index);
            node_first_child.push(child_index);
            outcome_index += node.outcomes.len() as u32;
            child_index += node.children.len() as u32;

            let lambda = trie.lambda(id, lambda_factor);
            node_log_one_minus_lambda.push((1.0 - lambda).ln() as f32);
            node_backoff.push(
                node.backoff
                    .map(|b| index_of[b] as i64)
                    .unwrap_or(-1),
            );

            for outcome in node.outcomes.keys() {
                let sym = outcome_table
                    .symbol_to_id(outcome)
                    .expect("outcome symbols registered during training");
                outcome_symbol.push(sym as u32);
                outcome_log_estimate
                    .push(trie.estimate(id, outcome, lambda_factor).ln() as f32);
            }
        }
        node_first_outcome.push(outcome_index);
        node_first_child.push(child_index);
        debug_assert_eq!(outcome_index as usize, outcome_symbol.len());
        debug_assert_eq!(child_index as usize, num_nodes);
        debug_assert!(trie.node(ROOT).symbol.is_none());

        Self {
            node_symbol,
            node_first_outcome,
            node_first_child,
            node_log_one_minus_lambda,
            node_backoff,
            outcome_symbol,
            outcome_log_estimate,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.node_symbol.len()
    }

    /// Estimate `symbol` from the node, backing off and accumulating
    /// `ln(1 - lambda)` penalties until found. NaN when the backoff chain
    /// is exhausted.
    pub fn estimate_from_node(&self, symbol: Option<usize>, node: usize) -> f64 {
        self.estimate_with_fallback(symbol, node, f64::NAN)
    }

    /// Like `estimate_from_node`, but falls back to the discounted
    /// uniform estimate instead of NaN.
    pub fn estimate_from_node_uniform(
        &self,
        symbol: Option<usize>,
        node: usize,
        uniform: f64,
    ) -> f64 {
        self.estimate_with_fallback(symbol, node, uniform)
    }

    fn estimate_with_fallback(&self, symbol: Option<usize>, node: usize, fallback: f64) -> f64 {
        let Some(symbol) = symbol else {
            return f64::NAN;
        };
        let symbol = symbol as u32;
        let mut acc = 0.0f64;
        let mut current = node as i64;
        while current >= 0 {
            let i = current as usize;
            let lo = self.node_first_outcome[i] as usize;
            let hi = self.node_first_outcome[i + 1] as usize;
            if let Ok(pos) = self.outcome_symbol[lo..hi].binary_search(&symbol) {
                return acc + self.outcome_log_estimate[lo + pos] as f64;
            }
            acc += self.node_log_one_minus_lambda[i] as f64;
            current = self.node_backoff[i];
        }
        if fallback.is_nan() {
            f64::NAN
        } else {
            acc + fallback
        }
    }

    /// Child of `parent` keyed by `symbol`, by binary search over the
    /// child range.
    pub fn lookup_child(&self, symbol: Option<usize>, parent: usize) -> Option<usize> {
        let symbol = symbol? as i64;
        let lo = self.node_first_child[parent] as usize;
        let hi = self.node_first_child[parent + 1] as usize;
        self.node_symbol[lo..hi]
            .binary_search(&symbol)
            .ok()
            .map(|pos| lo + pos)
    }

    /// Structural validation for deserialized tries.
    pub fn validate(&self, tag_symbols: usize, token_symbols: usize) -> Result<(), ModelError> {
        let n = self.node_symbol.len();
        if self.node_first_outcome.len() != n + 1
            || self.node_first_child.len() != n + 1
            || self.node_log_one_minus_lambda.len() != n
            || self.node_backoff.len() != n
        {
            return Err(ModelError::Corrupt(
                "trie node arrays have inconsistent lengths".to_string(),
            ));
        }
        if self.outcome_symbol.len() != self.outcome_log_estimate.len() {
            return Err(ModelError::Corrupt(
                "trie outcome arrays have inconsistent lengths".to_string(),
            ));
        }
        let num_outcomes = self.outcome_symbol.len() as u32;
        if *self.node_first_outcome.last().unwrap_or(&0) != num_outcomes
            || *self.node_first_child.last().unwrap_or(&0) != n as u32
        {
            return Err(ModelError::Corrupt(
                "trie boundary indices do not match array lengths".to_string(),
            ));
        }
        let max_symbols = tag_symbols.max(token_symbols) as i64;
        for i in 0..n {
            if self.node_first_outcome[i] > self.node_first_outcome[i + 1]
                || self.node_first_child[i] > self.node_first_child[i + 1]
            {
                return Err(ModelError::Corrupt(format!(
                    "trie index ranges decrease at node {i}"
                )));
            }
            if self.node_backoff[i] >= n as i64 || self.node_backoff[i] < -1 {
                return Err(ModelError::Corrupt(format!(
                    "trie backoff out of range at node {i}"
                )));
            }
            if self.node_symbol[i] >= max_symbols || self.node_symbol[i] < -1 {
                return Err(ModelError::Corrupt(format!(
                    "trie node symbol out of range at node {i}"
                )));
            }
        }
        Ok(())
    }
}
