//! Formula cache (§4.6): the schema-to-code generator's target-language
//! counterpart. There is no module text to compile here — the
//! interpreter in `super::eval` walks the transformed AST directly — but
//! re-parsing a formula's source on every recomputation would defeat the
//! point of caching "unchanged formulas survive schema rebuilds" (§4.6).
//! This module caches the transformed [`Body`] keyed by
//! `(table, col, source)`, exactly the key the source generator uses for
//! its compiled functions.

use std::rc::Rc;

use grist_formula::{Body, TransformedFormula};
use grist_types::{ColId, GristError, TableId};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct CachedFormula {
    pub body: Rc<Body>,
    pub was_empty: bool,
}

/// Keyed on the formula source text too, not just `(table, col)`, so a
/// formula edit invalidates only that one entry rather than requiring the
/// caller to clear the whole cache (§4.6 "formula bodies are cached... so
/// unchanged formulas reuse their compiled function").
#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: FxHashMap<(TableId, ColId, String), CachedFormula>,
}

impl FormulaCache {
    pub fn get_or_transform(
        &mut self,
        table: TableId,
        col: ColId,
        source: &str,
    ) -> Result<CachedFormula, GristError> {
        let key = (table, col, source.to_string());
        if let Some(cached) = self.entries.get(&key) {
            return Ok(cached.clone());
        }
        let TransformedFormula { body, was_empty } =
            grist_formula::transform(source).map_err(|e| e.0)?;
        let cached = CachedFormula {
            body: Rc::new(body),
            was_empty,
        };
        self.entries.insert(key, cached.clone());
        Ok(cached)
    }

    /// Drops every cached body for `(table, col)`, regardless of its
    /// source text; called when a column's formula is edited or the
    /// column itself is removed.
    pub fn invalidate_column(&mut self, table: TableId, col: ColId) {
        self.entries.retain(|(t, c, _), _| !(*t == table && *c == col));
    }

    pub fn invalidate_table(&mut self, table: TableId) {
        self.entries.retain(|(t, _, _), _| *t != table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookup_reuses_the_same_body() {
        let mut cache = FormulaCache::default();
        let first = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 2").unwrap();
        let second = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 2").unwrap();
        assert!(Rc::ptr_eq(&first.body, &second.body));
    }

    #[test]
    fn edited_source_misses_the_cache() {
        let mut cache = FormulaCache::default();
        let first = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 2").unwrap();
        let second = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 3").unwrap();
        assert!(!Rc::ptr_eq(&first.body, &second.body));
    }

    #[test]
    fn invalidate_column_forces_a_fresh_transform() {
        let mut cache = FormulaCache::default();
        let first = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 2").unwrap();
        cache.invalidate_column(TableId(1), ColId(1));
        let second = cache.get_or_transform(TableId(1), ColId(1), "$Amount * 2").unwrap();
        assert!(!Rc::ptr_eq(&first.body, &second.body));
    }
}
