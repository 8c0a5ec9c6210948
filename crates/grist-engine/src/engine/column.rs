//! Per-column storage (§4.1). Storage is sparse: an absent row holds the
//! column's type default rather than an explicit entry, so growing a table
//! or adding a column never requires backfilling every row.

use grist_types::{CellValue, ColId, ColumnType, RowId};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct Column {
    /// The column's string identifier, e.g. `"manualSort"` or `"Amount"`.
    /// Carried on the column itself (rather than a side table) since the
    /// lookup/translator code needs it by value far more often than by id.
    pub name: String,
    pub col_type: ColumnType,
    pub is_formula: bool,
    pub formula: Option<String>,
    pub default_formula: Option<String>,
    pub is_private: bool,
    /// Helper columns (§4.11 conditional rules) attached to this column,
    /// in application order; `rules[0]` governs the column's first rule.
    pub rules: Vec<ColId>,
    storage: FxHashMap<RowId, CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            is_formula: false,
            formula: None,
            default_formula: None,
            is_private: false,
            rules: Vec::new(),
            storage: FxHashMap::default(),
        }
    }

    pub fn formula(name: impl Into<String>, col_type: ColumnType, source: impl Into<String>) -> Self {
        let mut col = Self::new(name, col_type);
        col.is_formula = true;
        col.formula = Some(source.into());
        col
    }

    /// Stored value, or the type default for a row never explicitly set.
    pub fn get(&self, row: RowId) -> CellValue {
        self.storage
            .get(&row)
            .cloned()
            .unwrap_or_else(|| self.col_type.default_value())
    }

    /// Stores `value` verbatim, even if it fails `is_right_type` (§3
    /// "wrong-type cells": computation never silently replaces bad data).
    pub fn set(&mut self, row: RowId, value: CellValue) {
        if value == self.col_type.default_value() {
            self.storage.remove(&row);
        } else {
            self.storage.insert(row, value);
        }
    }

    pub fn unset(&mut self, row: RowId) {
        self.storage.remove(&row);
    }

    pub fn is_right_typed(&self, row: RowId) -> bool {
        self.storage
            .get(&row)
            .map(|v| self.col_type.is_right_type(v))
            .unwrap_or(true)
    }

    /// §4.1 `copy_from`: duplicates storage between columns of identical
    /// type, used by `ModifyColumn`/summary-table population.
    pub fn copy_from(&mut self, other: &Column) {
        self.storage = other.storage.clone();
    }

    pub fn explicit_rows(&self) -> impl Iterator<Item = RowId> + '_ {
        self.storage.keys().copied()
    }
}
