//! Tables and the document schema (§3). The schema is kept separate from
//! live column storage so the code generator (§4.6) can be driven purely
//! off it; the translator (§4.9) is responsible for keeping both in sync.

use std::collections::BTreeMap;

use grist_types::{CellValue, ColId, ColumnType, RowId, TableId};

use super::column::Column;

#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    /// User-facing string identifier, e.g. `"Orders"`.
    pub table_id: String,
    pub columns: BTreeMap<ColId, Column>,
    /// Ordering of `columns` as presented to the code generator and to
    /// `fetch_table`; row id 0, the empty record, is always a member.
    pub column_order: Vec<ColId>,
    rows: std::collections::BTreeSet<RowId>,
    next_row_id: i64,
    /// Tables that back-reference this one through `Ref`/`RefList`,
    /// recorded so `RemoveTable` can retype them (§3, §4.9).
    pub summary_source: Option<(TableId, Vec<ColId>)>,
}

impl Table {
    pub fn new(id: TableId, table_id: impl Into<String>) -> Self {
        let mut rows = std::collections::BTreeSet::new();
        rows.insert(RowId::EMPTY);
        Self {
            id,
            table_id: table_id.into(),
            columns: BTreeMap::new(),
            column_order: Vec::new(),
            rows,
            next_row_id: 1,
            summary_source: None,
        }
    }

    pub fn add_column(&mut self, col: ColId, column: Column) {
        self.columns.insert(col, column);
        self.column_order.push(col);
    }

    pub fn remove_column(&mut self, col: ColId) {
        self.columns.remove(&col);
        self.column_order.retain(|c| *c != col);
    }

    pub fn get(&self, col: ColId, row: RowId) -> CellValue {
        self.columns
            .get(&col)
            .map(|c| c.get(row))
            .unwrap_or(CellValue::Blank)
    }

    pub fn set(&mut self, col: ColId, row: RowId, value: CellValue) {
        if let Some(c) = self.columns.get_mut(&col) {
            c.set(row, value);
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_row(&self, row: RowId) -> bool {
        self.rows.contains(&row)
    }

    /// The row id the next call to [`Table::allocate_rows`]/
    /// [`Table::insert_row`] would hand out, without reserving it. Lets a
    /// caller that needs the id ahead of time (to build an action before
    /// applying it) do so without marking the row present twice.
    pub fn next_row_id(&self) -> RowId {
        RowId(self.next_row_id)
    }

    /// Allocates `n` fresh row ids and marks them present; does not touch
    /// column storage (callers set values per column afterwards).
    pub fn allocate_rows(&mut self, n: usize) -> Vec<RowId> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let id = RowId(self.next_row_id);
            self.next_row_id += 1;
            self.rows.insert(id);
            out.push(id);
        }
        out
    }

    /// Inserts a specific row id (used when replaying/undoing an add),
    /// advancing the allocator past it if needed.
    pub fn insert_row(&mut self, row: RowId) {
        self.rows.insert(row);
        if row.0 >= self.next_row_id {
            self.next_row_id = row.0 + 1;
        }
    }

    pub fn find_col_by_name(&self, name: &str) -> Option<ColId> {
        self.columns
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| *id)
    }

    pub fn remove_row(&mut self, row: RowId) {
        self.rows.remove(&row);
        for col in self.columns.values_mut() {
            col.unset(row);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub col_type: ColumnType,
    pub is_formula: bool,
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub columns: BTreeMap<ColId, ColumnSpec>,
    pub column_order: Vec<ColId>,
}

impl TableSchema {
    pub fn insert(&mut self, col: ColId, spec: ColumnSpec) {
        self.columns.insert(col, spec);
        self.column_order.push(col);
    }

    pub fn remove(&mut self, col: ColId) {
        self.columns.remove(&col);
        self.column_order.retain(|c| *c != col);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub tables: BTreeMap<TableId, TableSchema>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_starts_with_the_empty_record() {
        let t = Table::new(TableId(1), "Orders");
        assert!(t.has_row(RowId::EMPTY));
    }

    #[test]
    fn allocate_rows_never_reuses_ids() {
        let mut t = Table::new(TableId(1), "Orders");
        let first = t.allocate_rows(2);
        let second = t.allocate_rows(1);
        assert_eq!(first, vec![RowId(1), RowId(2)]);
        assert_eq!(second, vec![RowId(3)]);
    }

    #[test]
    fn remove_row_clears_every_column() {
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Name", ColumnType::Text));
        t.insert_row(RowId(5));
        t.set(ColId(1), RowId(5), CellValue::Text("x".into()));
        t.remove_row(RowId(5));
        assert!(!t.has_row(RowId(5)));
        assert_eq!(t.get(ColId(1), RowId(5)), CellValue::Text(String::new()));
    }
}
