//! Action summary (§4.8): per-`(table, col, row)` before/after batching
//! across one user action, plus label-delta tracking for renamed/added/
//! removed tables and columns.

use std::collections::BTreeMap;

use grist_types::{CellValue, ColId, RowId, TableId};

#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub before: CellValue,
    pub after: CellValue,
}

/// A table or column rename/add/remove, keyed by its *latest* name.
/// `None` marks a fresh creation; `Some(format!("-{name}"))`-style markers
/// are represented directly as [`LabelDelta::Removed`] so callers don't
/// have to parse a sentinel string back out.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelDelta {
    Created,
    Renamed { from: String },
    Removed { name: String },
}

#[derive(Debug, Default)]
pub struct ActionSummary {
    cells: BTreeMap<(TableId, ColId, RowId), CellChange>,
    /// Placeholder negative row ids introduced by a bulk add, mapped to
    /// their final assigned ids once known (§4.8).
    pending_row_ids: BTreeMap<(TableId, RowId), RowId>,
    table_labels: BTreeMap<TableId, LabelDelta>,
    column_labels: BTreeMap<(TableId, ColId), LabelDelta>,
}

impl ActionSummary {
    /// Records a cell change, keeping the first-seen `before` and the
    /// latest `after` if the same cell changes more than once in a batch.
    pub fn record(&mut self, table: TableId, col: ColId, row: RowId, before: CellValue, after: CellValue) {
        self.cells
            .entry((table, col, row))
            .and_modify(|c| c.after = after.clone())
            .or_insert(CellChange { before, after });
    }

    pub fn register_placeholder_row(&mut self, table: TableId, placeholder: RowId, assigned: RowId) {
        self.pending_row_ids.insert((table, placeholder), assigned);
    }

    pub fn resolve_row(&self, table: TableId, row: RowId) -> RowId {
        self.pending_row_ids.get(&(table, row)).copied().unwrap_or(row)
    }

    pub fn table_created(&mut self, table: TableId) {
        self.table_labels.insert(table, LabelDelta::Created);
    }

    pub fn table_renamed(&mut self, table: TableId, from: impl Into<String>) {
        let from = from.into();
        match self.table_labels.get(&table) {
            Some(LabelDelta::Created) => {} // creation subsumes a same-batch rename
            _ => {
                self.table_labels.insert(table, LabelDelta::Renamed { from });
            }
        }
    }

    pub fn table_removed(&mut self, table: TableId, name: impl Into<String>) {
        self.table_labels.insert(table, LabelDelta::Removed { name: name.into() });
    }

    pub fn column_created(&mut self, table: TableId, col: ColId) {
        self.column_labels.insert((table, col), LabelDelta::Created);
    }

    pub fn column_renamed(&mut self, table: TableId, col: ColId, from: impl Into<String>) {
        let from = from.into();
        match self.column_labels.get(&(table, col)) {
            Some(LabelDelta::Created) => {}
            _ => {
                self.column_labels.insert((table, col), LabelDelta::Renamed { from });
            }
        }
    }

    pub fn column_removed(&mut self, table: TableId, col: ColId, name: impl Into<String>) {
        self.column_labels.insert((table, col), LabelDelta::Removed { name: name.into() });
    }

    /// Drops cells whose before/after are `encoding_equal` (§8) and
    /// returns the surviving changes grouped by `(table, col)`, rows
    /// ascending, ready for compaction into bulk actions.
    pub fn finalize(self) -> Vec<((TableId, ColId), Vec<(RowId, CellValue, CellValue)>)> {
        let mut grouped: BTreeMap<(TableId, ColId), Vec<(RowId, CellValue, CellValue)>> = BTreeMap::new();
        for ((table, col, row), change) in self.cells {
            if change.before.encoding_equal(&change.after) {
                continue;
            }
            grouped.entry((table, col)).or_default().push((row, change.before, change.after));
        }
        grouped.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(|c| c.before.encoding_equal(&c.after))
            && self.table_labels.is_empty()
            && self.column_labels.is_empty()
    }
}
