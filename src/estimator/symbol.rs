//! Compact string-to-id symbol tables.
//!
//! Ids are assigned in sorted-symbol order, so string order and id order
//! agree. The compiled trie depends on this: children of a node are laid
//! out in string order and binary-searched by id.

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn from_symbols(symbols: &BTreeSet<String>) -> Self {
        Self {
            symbols: symbols.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol_to_id(&self, symbol: &str) -> Option<usize> {
        self.symbols
            .binary_search_by(|s| s.as_str().cmp(symbol))
            .ok()
    }

    pub fn id_to_symbol(&self, id: usize) -> &str {
        &self.symbols[id]
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Structural check for deserialized tables: sorted and duplicate-free.
    pub(crate) fn is_well_formed(&self) -> bool {
        self.symbols.windows(2).all(|w| w[0] < w[1])
    }
}
