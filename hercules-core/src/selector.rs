//! Bitkey resolution
//!
//! Maps a bitkey to the ordered list of method keys it selects. The registry
//! is frozen inside the selector, so every possible answer is computed once
//! up front and `resolve` is a bounds check plus a table lookup.

use crate::error::{HerculesError, Result};
use crate::methods::{Method, MethodRegistry};

/// Resolves bitkeys against a frozen registry
#[derive(Debug, Clone)]
pub struct BitkeySelector {
    registry: MethodRegistry,
    /// `table[k]` holds the keys selected by bitkey `k`
    table: Vec<Vec<String>>,
}

impl BitkeySelector {
    pub fn new(registry: MethodRegistry) -> Self {
        let size = 1usize << registry.width();
        let table = (0..size)
            .map(|bitkey| scan(registry.methods(), bitkey as i64))
            .collect();

        Self { registry, table }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn max_bitkey(&self) -> i64 {
        self.registry.max_bitkey()
    }

    /// Keys of the methods selected by `bitkey`, in ascending bit order
    pub fn resolve(&self, bitkey: i64) -> Result<&[String]> {
        let max = self.max_bitkey();
        if !(0..=max).contains(&bitkey) {
            return Err(HerculesError::InvalidBitkey { value: bitkey, max });
        }
        Ok(&self.table[bitkey as usize])
    }

    /// Like [`resolve`](Self::resolve) but yields the full method records
    pub fn resolve_methods(&self, bitkey: i64) -> Result<Vec<&Method>> {
        let keys = self.resolve(bitkey)?;
        Ok(keys
            .iter()
            .filter_map(|key| self.registry.find_by_key(key))
            .collect())
    }
}

impl Default for BitkeySelector {
    fn default() -> Self {
        Self::new(MethodRegistry::builtin())
    }
}

fn scan(methods: &[Method], bitkey: i64) -> Vec<String> {
    methods
        .iter()
        .filter(|m| bitkey & (1i64 << m.bit) != 0)
        .map(|m| m.key.clone())
        .collect()
}
