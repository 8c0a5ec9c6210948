//! The `Engine` facade (§6): accepts and returns named (`table_id`/
//! `col_id` string) values, translating to and from the internal
//! `grist_engine::Document`'s numeric ids. A whole [`UserAction`] bundle
//! applies atomically — any failure rolls back everything already
//! applied in the bundle via its recorded inverses before returning.
//!
//! The wire byte-encoding of actions (the tagged-array scheme for
//! `Ref`/`RefList`/`Raised`/etc. values) is explicitly out of scope; this
//! layer exchanges plain Rust values and leaves encoding to the host.

use std::collections::BTreeMap;

use grist_engine::engine::{action, docmodel, migrations, summary::ActionSummary, translator};
use grist_engine::{Action, ColumnSpec, Document};
use grist_types::{CellValue, ColId, ColumnType, DependencyNode, GristError, RowId, TableId};

#[derive(Debug, Default)]
pub struct Engine {
    doc: Document,
}

/// A single user-facing intent, named by string `table_id`/`col_id`
/// rather than the engine's internal ids (§4.9, §6).
#[derive(Debug, Clone)]
pub enum UserAction {
    AddRecord { table_id: String, values: BTreeMap<String, CellValue> },
    BulkAddRecord { table_id: String, values: BTreeMap<String, Vec<CellValue>> },
    UpdateRecord { table_id: String, row_id: i64, values: BTreeMap<String, CellValue> },
    BulkUpdateRecord { table_id: String, row_ids: Vec<i64>, values: BTreeMap<String, Vec<CellValue>> },
    RemoveRecord { table_id: String, row_id: i64 },
    BulkRemoveRecord { table_id: String, row_ids: Vec<i64> },
    AddColumn { table_id: String, col_id: String, col_type: ColumnType, formula: Option<String> },
    RemoveColumn { table_id: String, col_id: String },
    /// §4.11, §8 Scenario 4: attaches a `gristHelper_ConditionalRule`
    /// helper column to `col_id` and appends it to that column's `rules`.
    /// Returns the new helper column's id so the caller can follow up
    /// with a `ModifyColumn` setting its actual rule formula.
    AddEmptyRule { table_id: String, col_id: String },
    RenameColumn { table_id: String, col_id: String, new_col_id: String },
    ModifyColumn { table_id: String, col_id: String, col_type: ColumnType, formula: Option<String> },
    /// §4.1: rewrites every `Choice`/`ChoiceList` cell in `col_id` through
    /// `renames` (old choice text -> new choice text).
    RenameChoices { table_id: String, col_id: String, renames: BTreeMap<String, String> },
    AddTable { table_id: String, columns: Vec<(String, ColumnType)> },
    RemoveTable { table_id: String },
    RenameTable { table_id: String, new_table_id: String },
}

/// What a single action in the bundle handed back to its caller, mirroring
/// `retValues` in §6 (e.g. the row id `AddRecord` assigned).
#[derive(Debug, Clone, PartialEq)]
pub enum RetValue {
    None,
    RowId(i64),
    RowIds(Vec<i64>),
    ColId(String),
}

/// A net before/after cell change, named rather than id-keyed. This is
/// `stored`'s unit: the engine's finalized cell-delta view
/// (`ActionSummary::finalize`) rather than a replay of the raw
/// per-variant `DocAction`s the wire form would use.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDelta {
    pub table_id: String,
    pub col_id: String,
    pub row_id: i64,
    pub before: CellValue,
    pub after: CellValue,
}

/// A formula column touched by the recalculation a bundle triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcNode {
    pub table_id: String,
    pub col_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActionBundleResult {
    pub stored: Vec<CellDelta>,
    pub undo: Vec<Action>,
    pub calc: Vec<CalcNode>,
    pub ret_values: Vec<RetValue>,
}

/// `fetch_table`'s result: shaped like `BulkAddRecord` args (§6), minus
/// the empty-record row every table carries internally.
#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub table_id: String,
    pub row_ids: Vec<i64>,
    pub columns: BTreeMap<String, Vec<CellValue>>,
}

impl Engine {
    pub fn new() -> Self {
        Self { doc: Document::new() }
    }

    pub fn schema_version(&self) -> u32 {
        migrations::CURRENT_SCHEMA_VERSION
    }

    /// Brings a document stored at `from_version` up to date (§6 "the
    /// engine also migrates older document schemas forward").
    pub fn migrate(&mut self, from_version: u32) -> Result<u32, GristError> {
        migrations::migrate(&mut self.doc, from_version)
    }

    fn resolve_table(&self, table_id: &str) -> Result<TableId, GristError> {
        self.doc
            .find_table_by_name(table_id)
            .ok_or_else(|| GristError::invalid_action(format!("no such table {table_id}")))
    }

    fn resolve_col(&self, table: TableId, col_id: &str) -> Result<ColId, GristError> {
        self.doc
            .table(table)
            .and_then(|t| t.find_col_by_name(col_id))
            .ok_or_else(|| GristError::invalid_action(format!("no such column {col_id}")))
    }

    fn resolve_values(&self, table: TableId, values: BTreeMap<String, CellValue>) -> Result<BTreeMap<ColId, CellValue>, GristError> {
        values.into_iter().map(|(name, v)| Ok((self.resolve_col(table, &name)?, v))).collect()
    }

    fn resolve_bulk_values(
        &self,
        table: TableId,
        values: BTreeMap<String, Vec<CellValue>>,
        count: usize,
    ) -> Result<Vec<BTreeMap<ColId, CellValue>>, GristError> {
        let mut resolved: BTreeMap<ColId, Vec<CellValue>> = BTreeMap::new();
        for (name, vs) in values {
            resolved.insert(self.resolve_col(table, &name)?, vs);
        }
        let mut rows = Vec::with_capacity(count);
        for i in 0..count {
            rows.push(resolved.iter().map(|(&c, vs)| (c, vs[i].clone())).collect());
        }
        Ok(rows)
    }

    /// Applies a bundle of user actions as one atomic unit (§6, §7): on
    /// the first failure, every action already applied in this call is
    /// rolled back via its recorded inverse, in reverse order, before the
    /// error is returned.
    pub fn apply_user_actions(&mut self, actions: Vec<UserAction>) -> Result<ActionBundleResult, GristError> {
        let mut summary = ActionSummary::default();
        let mut inverses: Vec<Action> = Vec::new();
        let mut ret_values = Vec::new();

        for user_action in actions {
            if let Err(err) = self.apply_one(&mut summary, user_action, &mut inverses, &mut ret_values) {
                for inverse in inverses.into_iter().rev() {
                    let _ = action::apply(&mut self.doc, &mut summary, inverse);
                }
                return Err(err);
            }
        }

        let touched = grist_engine::engine::recalc::run(&mut self.doc, &mut summary);
        let calc = touched
            .into_iter()
            .filter_map(|n| self.node_name(n))
            .collect();

        // §4.10: any record a formula marked obsolete during recalculation is
        // only actually removed once the whole bundle has settled.
        let removals = docmodel::drain_auto_remove_queue(&mut self.doc, &mut summary)?;
        inverses.extend(removals);

        let undo: Vec<Action> = inverses.into_iter().rev().collect();
        let stored = self.deltas_from(summary);
        Ok(ActionBundleResult { stored, undo, calc, ret_values })
    }

    fn node_name(&self, node: DependencyNode) -> Option<CalcNode> {
        let t = self.doc.table(node.table)?;
        let col = t.columns.get(&node.col)?;
        Some(CalcNode { table_id: t.table_id.clone(), col_id: col.name.clone() })
    }

    fn deltas_from(&self, summary: ActionSummary) -> Vec<CellDelta> {
        summary
            .finalize()
            .into_iter()
            .flat_map(|((table, col), rows)| {
                let names = self.doc.table(table).and_then(|t| Some((t.table_id.clone(), t.columns.get(&col)?.name.clone())));
                rows.into_iter().filter_map(move |(row, before, after)| {
                    let (table_id, col_id) = names.clone()?;
                    Some(CellDelta { table_id, col_id, row_id: row.0, before, after })
                })
            })
            .collect()
    }

    fn apply_one(
        &mut self,
        summary: &mut ActionSummary,
        user_action: UserAction,
        inverses: &mut Vec<Action>,
        ret_values: &mut Vec<RetValue>,
    ) -> Result<(), GristError> {
        match user_action {
            UserAction::AddRecord { table_id, values } => {
                let table = self.resolve_table(&table_id)?;
                let values = self.resolve_values(table, values)?;
                let (rows, row_inverses) = translator::add_records(&mut self.doc, summary, table, vec![values], None)?;
                inverses.extend(row_inverses);
                ret_values.push(RetValue::RowId(rows[0].0));
            }
            UserAction::BulkAddRecord { table_id, values } => {
                let table = self.resolve_table(&table_id)?;
                let count = values.values().next().map(Vec::len).unwrap_or(0);
                let per_row = self.resolve_bulk_values(table, values, count)?;
                let (rows, row_inverses) = translator::add_records(&mut self.doc, summary, table, per_row, None)?;
                inverses.extend(row_inverses);
                ret_values.push(RetValue::RowIds(rows.into_iter().map(|r| r.0).collect()));
            }
            UserAction::UpdateRecord { table_id, row_id, values } => {
                let table = self.resolve_table(&table_id)?;
                let values = self.resolve_values(table, values)?;
                let inverse = translator::update_record(&mut self.doc, summary, table, RowId(row_id), values)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::BulkUpdateRecord { table_id, row_ids, values } => {
                let table = self.resolve_table(&table_id)?;
                let per_row = self.resolve_bulk_values(table, values, row_ids.len())?;
                for (row_id, values) in row_ids.iter().zip(per_row) {
                    let inverse = translator::update_record(&mut self.doc, summary, table, RowId(*row_id), values)?;
                    inverses.push(inverse);
                }
                ret_values.push(RetValue::None);
            }
            UserAction::RemoveRecord { table_id, row_id } => {
                let table = self.resolve_table(&table_id)?;
                let inverse = translator::remove_records(&mut self.doc, summary, table, vec![RowId(row_id)])?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::BulkRemoveRecord { table_id, row_ids } => {
                let table = self.resolve_table(&table_id)?;
                let rows = row_ids.into_iter().map(RowId).collect();
                let inverse = translator::remove_records(&mut self.doc, summary, table, rows)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::AddColumn { table_id, col_id, col_type, formula } => {
                let table = self.resolve_table(&table_id)?;
                let spec = ColumnSpec { col_type, is_formula: formula.is_some(), formula };
                let (_, inverse) = translator::add_column(&mut self.doc, summary, table, col_id, spec)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::RemoveColumn { table_id, col_id } => {
                let table = self.resolve_table(&table_id)?;
                let col = self.resolve_col(table, &col_id)?;
                let inverse = action::apply(&mut self.doc, summary, Action::RemoveColumn { table, col })?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::AddEmptyRule { table_id, col_id } => {
                let table = self.resolve_table(&table_id)?;
                let col = self.resolve_col(table, &col_id)?;
                let (helper_col, inverse) = translator::add_empty_rule(&mut self.doc, summary, table, col)?;
                inverses.push(inverse);
                let helper_name = self.doc.table(table).and_then(|t| t.columns.get(&helper_col)).map(|c| c.name.clone()).unwrap_or_default();
                ret_values.push(RetValue::ColId(helper_name));
            }
            UserAction::RenameColumn { table_id, col_id, new_col_id } => {
                let table = self.resolve_table(&table_id)?;
                let col = self.resolve_col(table, &col_id)?;
                let inverse = translator::rename_column(&mut self.doc, summary, table, col, new_col_id)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::ModifyColumn { table_id, col_id, col_type, formula } => {
                let table = self.resolve_table(&table_id)?;
                let col = self.resolve_col(table, &col_id)?;
                let spec = ColumnSpec { col_type, is_formula: formula.is_some(), formula };
                let inverse = action::apply(&mut self.doc, summary, Action::ModifyColumn { table, col, spec })?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::RenameChoices { table_id, col_id, renames } => {
                let table = self.resolve_table(&table_id)?;
                let col = self.resolve_col(table, &col_id)?;
                let inverse = action::apply(&mut self.doc, summary, Action::RenameChoices { table, col, renames })?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::AddTable { table_id, columns } => {
                let specs = columns
                    .into_iter()
                    .map(|(name, col_type)| (name, ColumnSpec { col_type, is_formula: false, formula: None }))
                    .collect();
                let (_, inverse) = translator::add_table(&mut self.doc, summary, table_id, specs)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::RemoveTable { table_id } => {
                let table = self.resolve_table(&table_id)?;
                let inverse = action::apply(&mut self.doc, summary, Action::RemoveTable { table })?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
            UserAction::RenameTable { table_id, new_table_id } => {
                let table = self.resolve_table(&table_id)?;
                let inverse = translator::rename_table(&mut self.doc, summary, table, new_table_id)?;
                inverses.push(inverse);
                ret_values.push(RetValue::None);
            }
        }
        Ok(())
    }

    /// Every non-formula (or every column, if `formulas`) value for every
    /// live row of `table_id`, shaped like `BulkAddRecord` args (§6).
    pub fn fetch_table(&self, table_id: &str, formulas: bool) -> Option<TableData> {
        let table = self.doc.find_table_by_name(table_id)?;
        let t = self.doc.table(table)?;
        let row_ids: Vec<RowId> = t.rows().filter(|r| !r.is_empty_record()).collect();
        let mut columns = BTreeMap::new();
        for &col in &t.column_order {
            let column = &t.columns[&col];
            if column.is_formula && !formulas {
                continue;
            }
            columns.insert(column.name.clone(), row_ids.iter().map(|&r| t.get(col, r)).collect());
        }
        Some(TableData {
            table_id: table_id.to_string(),
            row_ids: row_ids.into_iter().map(|r| r.0).collect(),
            columns,
        })
    }

    /// The full sequence of `AddTable`+`BulkAddRecord` actions needed to
    /// rebuild this document from empty (§6 `fetch_snapshot`).
    pub fn fetch_snapshot(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for (&table, t) in &self.doc.tables {
            let columns: Vec<(ColId, String, ColumnSpec)> = t
                .column_order
                .iter()
                .map(|&c| {
                    let col = &t.columns[&c];
                    (c, col.name.clone(), ColumnSpec { col_type: col.col_type.clone(), is_formula: col.is_formula, formula: col.formula.clone() })
                })
                .collect();
            actions.push(Action::AddTable { table, table_id: t.table_id.clone(), columns });

            let rows: Vec<RowId> = t.rows().filter(|r| !r.is_empty_record()).collect();
            if rows.is_empty() {
                continue;
            }
            let mut values: BTreeMap<ColId, Vec<CellValue>> = BTreeMap::new();
            for &col in &t.column_order {
                values.insert(col, rows.iter().map(|&r| t.get(col, r)).collect());
            }
            actions.push(Action::BulkAddRecord { table, rows, values });
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, CellValue)]) -> BTreeMap<String, CellValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn orders_engine() -> Engine {
        let mut engine = Engine::new();
        engine
            .apply_user_actions(vec![UserAction::AddTable {
                table_id: "Orders".to_string(),
                columns: vec![
                    ("Amount".to_string(), ColumnType::Numeric),
                    ("Double".to_string(), ColumnType::Numeric),
                ],
            }])
            .unwrap();
        engine
            .apply_user_actions(vec![UserAction::ModifyColumn {
                table_id: "Orders".to_string(),
                col_id: "Double".to_string(),
                col_type: ColumnType::Numeric,
                formula: Some("rec.Amount * 2".to_string()),
            }])
            .unwrap();
        engine
    }

    #[test]
    fn add_record_recomputes_dependent_formula() {
        let mut engine = orders_engine();
        let result = engine
            .apply_user_actions(vec![UserAction::AddRecord {
                table_id: "Orders".to_string(),
                values: values(&[("Amount", CellValue::Numeric(5.0))]),
            }])
            .unwrap();
        assert_eq!(result.ret_values, vec![RetValue::RowId(1)]);
        let table = engine.fetch_table("Orders", true).unwrap();
        assert_eq!(table.columns["Double"], vec![CellValue::Numeric(10.0)]);
    }

    #[test]
    fn invalid_action_rolls_back_the_whole_bundle() {
        let mut engine = orders_engine();
        let result = engine.apply_user_actions(vec![
            UserAction::AddRecord {
                table_id: "Orders".to_string(),
                values: values(&[("Amount", CellValue::Numeric(1.0))]),
            },
            UserAction::RemoveColumn {
                table_id: "Orders".to_string(),
                col_id: "NoSuchColumn".to_string(),
            },
        ]);
        assert!(result.is_err());
        let table = engine.fetch_table("Orders", true).unwrap();
        assert!(table.row_ids.is_empty());
    }

    #[test]
    fn fetch_table_without_formulas_omits_formula_columns() {
        let engine = orders_engine();
        let table = engine.fetch_table("Orders", false).unwrap();
        assert!(!table.columns.contains_key("Double"));
        assert!(table.columns.contains_key("Amount"));
    }

    #[test]
    fn fetch_snapshot_rebuilds_an_equivalent_document() {
        let mut engine = orders_engine();
        engine
            .apply_user_actions(vec![UserAction::AddRecord {
                table_id: "Orders".to_string(),
                values: values(&[("Amount", CellValue::Numeric(3.0))]),
            }])
            .unwrap();
        let snapshot = engine.fetch_snapshot();
        assert!(snapshot.iter().any(|a| matches!(a, Action::AddTable { table_id, .. } if table_id == "Orders")));
        assert!(snapshot.iter().any(|a| matches!(a, Action::BulkAddRecord { .. })));
    }

    #[test]
    fn rename_table_updates_fetch_table_lookup() {
        let mut engine = orders_engine();
        engine
            .apply_user_actions(vec![UserAction::RenameTable {
                table_id: "Orders".to_string(),
                new_table_id: "Purchases".to_string(),
            }])
            .unwrap();
        assert!(engine.fetch_table("Orders", true).is_none());
        assert!(engine.fetch_table("Purchases", true).is_some());
    }
}
