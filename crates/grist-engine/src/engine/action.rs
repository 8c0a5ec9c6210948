//! Data actions (§3, §4.7): the only way document state is mutated.
//! Every variant has a handler that applies the mutation, returns its
//! exact inverse, records per-cell before/after into the action summary,
//! and schedules dependents for recomputation.

use std::collections::BTreeMap;

use grist_types::{CellValue, ColId, ColumnType, GristError, RowId, TableId};
use rustc_hash::FxHashSet;

use super::column::Column;
use super::relation::reindex_reference_column;
use super::summary::ActionSummary;
use super::table::{ColumnSpec, Table};
use super::Document;

pub type ActionError = GristError;

/// A data action, per §3's tagged-structure list. Column/table-spanning
/// "bulk" variants carry columnar (`col -> per-row values`) maps rather
/// than a value map per row, matching the wire shape in §6.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddRecord {
        table: TableId,
        row: RowId,
        values: BTreeMap<ColId, CellValue>,
    },
    BulkAddRecord {
        table: TableId,
        rows: Vec<RowId>,
        values: BTreeMap<ColId, Vec<CellValue>>,
    },
    RemoveRecord {
        table: TableId,
        row: RowId,
    },
    BulkRemoveRecord {
        table: TableId,
        rows: Vec<RowId>,
    },
    UpdateRecord {
        table: TableId,
        row: RowId,
        values: BTreeMap<ColId, CellValue>,
    },
    BulkUpdateRecord {
        table: TableId,
        rows: Vec<RowId>,
        values: BTreeMap<ColId, Vec<CellValue>>,
    },
    ReplaceTableData {
        table: TableId,
        rows: Vec<RowId>,
        values: BTreeMap<ColId, Vec<CellValue>>,
    },
    AddColumn {
        table: TableId,
        col: ColId,
        name: String,
        spec: ColumnSpec,
    },
    RemoveColumn {
        table: TableId,
        col: ColId,
    },
    RenameColumn {
        table: TableId,
        col: ColId,
        new_name: String,
    },
    ModifyColumn {
        table: TableId,
        col: ColId,
        spec: ColumnSpec,
    },
    AddTable {
        table: TableId,
        table_id: String,
        columns: Vec<(ColId, String, ColumnSpec)>,
    },
    RemoveTable {
        table: TableId,
    },
    RenameTable {
        table: TableId,
        new_name: String,
    },
    /// §4.11: attaches a `gristHelper_ConditionalRule`-style helper column
    /// to `col` and appends it to `col`'s `rules` list. `name`/`spec`
    /// describe the helper column itself (normally `Any`-typed with an
    /// empty formula, later filled in by a plain `ModifyColumn`); they
    /// are also how `RemoveColumn` rebuilds this action as the exact
    /// inverse when undoing the removal of a rule helper column whose
    /// formula was since edited.
    AddEmptyRule {
        table: TableId,
        col: ColId,
        helper_col: ColId,
        name: String,
        spec: ColumnSpec,
    },
    /// §4.1 "rename of a choice rewrites stored values": rewrites every
    /// `Choice` cell equal to a key of `renames` to its mapped value, and
    /// every matching element of a `ChoiceList` cell, across the whole
    /// column. Grounded on `test_summary_choicelist.py`'s
    /// `['RenameChoices', table_id, col_id, {old: new, ...}]` action.
    RenameChoices {
        table: TableId,
        col: ColId,
        renames: BTreeMap<String, String>,
    },
}

fn node(table: TableId, col: ColId) -> grist_types::DependencyNode {
    grist_types::DependencyNode::new(table, col)
}

pub(crate) fn set_row(table: &mut Table, row: RowId, values: &BTreeMap<ColId, CellValue>, summary: &mut ActionSummary) {
    for (&col, value) in values {
        let before = table.get(col, row);
        table.set(col, row, value.clone());
        summary.record(table.id, col, row, before, value.clone());
    }
}

pub(crate) fn reindex_refs_for_row(doc: &mut Document, table: TableId, row: RowId) {
    let ref_cols: Vec<(ColId, TableId)> = doc
        .tables
        .get(&table)
        .map(|t| {
            t.columns
                .iter()
                .filter_map(|(&c, col)| match &col.col_type {
                    ColumnType::Ref(target) | ColumnType::RefList(target) => Some((c, *target)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    for (col, target) in ref_cols {
        if let Some(t) = doc.tables.get(&table) {
            let source = super::backrefs::RefSource { table, col };
            match t.get(col, row) {
                CellValue::Ref(r) if !r.is_empty_record() => doc.backrefs.add_pointer(target, r, source, row),
                CellValue::RefList(list) => {
                    for r in list.as_slice() {
                        doc.backrefs.add_pointer(target, *r, source, row);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Applies `action` to `doc`, returning its exact inverse. Rows and
/// columns named in the action are assumed to already exist (the
/// translator allocates ids before calling down into this layer).
pub fn apply(doc: &mut Document, summary: &mut ActionSummary, action: Action) -> Result<Action, ActionError> {
    match action {
        Action::AddRecord { table, row, values } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            if t.has_row(row) {
                return Err(GristError::invalid_action(format!("row {row:?} already exists")));
            }
            t.insert_row(row);
            set_row(t, row, &values, summary);
            reindex_refs_for_row(doc, table, row);
            schedule_own_formula_columns(doc, table, row);
            schedule_dependents_of_row(doc, table, row, &values);
            Ok(Action::RemoveRecord { table, row })
        }
        Action::BulkAddRecord { table, rows, values } => {
            for (i, &row) in rows.iter().enumerate() {
                let row_values: BTreeMap<ColId, CellValue> =
                    values.iter().map(|(&c, vs)| (c, vs[i].clone())).collect();
                apply(doc, summary, Action::AddRecord { table, row, values: row_values })?;
            }
            Ok(Action::BulkRemoveRecord { table, rows })
        }
        Action::RemoveRecord { table, row } => {
            let before = capture_row(doc, table, row);
            clear_backrefs_for_row(doc, table, row);
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            for (&col, value) in &before {
                summary.record(table, col, row, value.clone(), t.columns.get(&col).map(|c| c.col_type.default_value()).unwrap_or(CellValue::Blank));
            }
            t.remove_row(row);
            schedule_dependents_of_row(doc, table, row, &before);
            Ok(Action::AddRecord { table, row, values: before })
        }
        Action::BulkRemoveRecord { table, rows } => {
            let mut all_values: BTreeMap<ColId, Vec<CellValue>> = BTreeMap::new();
            for &row in &rows {
                let before = capture_row(doc, table, row);
                apply(doc, summary, Action::RemoveRecord { table, row })?;
                for (col, value) in before {
                    all_values.entry(col).or_default().push(value);
                }
            }
            Ok(Action::BulkAddRecord { table, rows, values: all_values })
        }
        Action::UpdateRecord { table, row, values } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let mut inverse = BTreeMap::new();
            for &col in values.keys() {
                inverse.insert(col, t.get(col, row));
            }
            set_row(t, row, &values, summary);
            reindex_refs_for_row(doc, table, row);
            schedule_dependents_of_row(doc, table, row, &values);
            Ok(Action::UpdateRecord { table, row, values: inverse })
        }
        Action::BulkUpdateRecord { table, rows, values } => {
            let mut inverse: BTreeMap<ColId, Vec<CellValue>> = BTreeMap::new();
            for (i, &row) in rows.iter().enumerate() {
                let row_values: BTreeMap<ColId, CellValue> =
                    values.iter().map(|(&c, vs)| (c, vs[i].clone())).collect();
                let Action::UpdateRecord { values: row_inverse, .. } =
                    apply(doc, summary, Action::UpdateRecord { table, row, values: row_values })?
                else {
                    unreachable!()
                };
                for (col, value) in row_inverse {
                    inverse.entry(col).or_default().push(value);
                }
            }
            Ok(Action::BulkUpdateRecord { table, rows, values: inverse })
        }
        Action::ReplaceTableData { table, rows, values } => {
            let old_rows: Vec<RowId> = doc
                .tables
                .get(&table)
                .map(|t| t.rows().filter(|r| !r.is_empty_record()).collect())
                .unwrap_or_default();
            let mut inverse_values: BTreeMap<ColId, Vec<CellValue>> = BTreeMap::new();
            if !old_rows.is_empty() {
                let Action::BulkAddRecord { values: restored, .. } =
                    apply(doc, summary, Action::BulkRemoveRecord { table, rows: old_rows.clone() })?
                else {
                    unreachable!()
                };
                inverse_values = restored;
            }
            apply(doc, summary, Action::BulkAddRecord { table, rows: rows.clone(), values })?;
            Ok(Action::ReplaceTableData { table, rows: old_rows, values: inverse_values })
        }
        Action::AddColumn { table, col, name, spec } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            if t.columns.contains_key(&col) {
                return Err(GristError::invalid_action(format!("duplicate column id {col:?}")));
            }
            let mut column = Column::new(name, spec.col_type.clone());
            column.is_formula = spec.is_formula;
            column.formula = spec.formula.clone();
            t.add_column(col, column);
            if let ColumnType::Ref(target) | ColumnType::RefList(target) = spec.col_type {
                let t = doc.tables.get(&table).unwrap();
                reindex_reference_column(t, col, target, &mut doc.backrefs);
            }
            summary.column_created(table, col);
            if spec.is_formula {
                let rows: Vec<RowId> = doc.tables.get(&table).map(|t| t.rows().collect()).unwrap_or_default();
                doc.graph.schedule(node(table, col), rows);
            }
            Ok(Action::RemoveColumn { table, col })
        }
        Action::RemoveColumn { table, col } => {
            let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let existing = t.columns.get(&col).cloned().ok_or_else(|| GristError::invalid_action("no such column"))?;
            let name = existing.name.clone();
            let spec = ColumnSpec {
                col_type: existing.col_type.clone(),
                is_formula: existing.is_formula,
                formula: existing.formula.clone(),
            };
            if let ColumnType::Ref(target) | ColumnType::RefList(target) = &existing.col_type {
                doc.backrefs.unregister_column(*target, super::backrefs::RefSource { table, col });
            }
            // §4.11: a column's own rule helper columns are ordinary
            // columns, so removing one (directly, or as the side effect of
            // undoing an `AddEmptyRule`) must also unlist it from whatever
            // column's `rules` named it.
            let rule_owner = t
                .column_order
                .iter()
                .find(|&&c| t.columns[&c].rules.contains(&col))
                .copied();
            doc.formulas.invalidate_column(table, col);
            let t = doc.tables.get_mut(&table).unwrap();
            t.remove_column(col);
            if let Some(owner) = rule_owner {
                t.columns.get_mut(&owner).unwrap().rules.retain(|&c| c != col);
            }
            summary.column_removed(table, col, name.clone());
            Ok(match rule_owner {
                Some(owner) => Action::AddEmptyRule { table, col: owner, helper_col: col, name, spec },
                None => Action::AddColumn { table, col, name, spec },
            })
        }
        Action::AddEmptyRule { table, col, helper_col, name, spec } => {
            let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            if !t.columns.contains_key(&col) {
                return Err(GristError::invalid_action("no such column"));
            }
            if t.columns.contains_key(&helper_col) {
                return Err(GristError::invalid_action("duplicate column id"));
            }
            let mut helper = Column::new(name.clone(), spec.col_type.clone());
            helper.is_formula = spec.is_formula;
            helper.formula = spec.formula.clone();
            helper.is_private = true;
            let t = doc.tables.get_mut(&table).unwrap();
            t.add_column(helper_col, helper);
            t.columns.get_mut(&col).unwrap().rules.push(helper_col);
            summary.column_created(table, helper_col);
            if spec.is_formula {
                let rows: Vec<RowId> = doc.tables.get(&table).map(|t| t.rows().collect()).unwrap_or_default();
                doc.graph.schedule(node(table, helper_col), rows);
            }
            Ok(Action::RemoveColumn { table, col: helper_col })
        }
        Action::RenameColumn { table, col, new_name } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let column = t.columns.get_mut(&col).ok_or_else(|| GristError::invalid_action("no such column"))?;
            let old_name = std::mem::replace(&mut column.name, new_name.clone());
            summary.column_renamed(table, col, old_name.clone());
            Ok(Action::RenameColumn { table, col, new_name: old_name })
        }
        Action::ModifyColumn { table, col, spec } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let column = t.columns.get_mut(&col).ok_or_else(|| GristError::invalid_action("no such column"))?;
            let old_spec = ColumnSpec {
                col_type: column.col_type.clone(),
                is_formula: column.is_formula,
                formula: column.formula.clone(),
            };
            column.col_type = spec.col_type.clone();
            column.is_formula = spec.is_formula;
            column.formula = spec.formula.clone();
            doc.formulas.invalidate_column(table, col);
            doc.graph.clear_dependencies(node(table, col));
            if spec.is_formula {
                let rows: Vec<RowId> = doc.tables.get(&table).map(|t| t.rows().collect()).unwrap_or_default();
                doc.graph.schedule(node(table, col), rows);
            }
            Ok(Action::ModifyColumn { table, col, spec: old_spec })
        }
        Action::RenameChoices { table, col, renames } => {
            let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let column = t.columns.get(&col).ok_or_else(|| GristError::invalid_action("no such column"))?;
            let col_type = column.col_type.clone();
            let rows: Vec<RowId> = t.rows().filter(|r| !r.is_empty_record()).collect();
            let mut changed: Vec<(RowId, CellValue)> = Vec::new();
            for row in rows {
                let value = t.get(col, row);
                let renamed = match (&col_type, &value) {
                    (ColumnType::Choice, CellValue::Text(s)) => renames.get(s).cloned().map(CellValue::Text),
                    (ColumnType::ChoiceList, CellValue::ChoiceList(list)) => {
                        let mut renamed_list = list.clone();
                        for (from, to) in &renames {
                            renamed_list.rename_choice(from, to);
                        }
                        if renamed_list != *list { Some(CellValue::ChoiceList(renamed_list)) } else { None }
                    }
                    _ => None,
                };
                if let Some(new_value) = renamed {
                    changed.push((row, new_value));
                }
            }
            for (row, new_value) in changed {
                apply(doc, summary, Action::UpdateRecord { table, row, values: BTreeMap::from([(col, new_value)]) })?;
            }
            let inverse_renames = renames.into_iter().map(|(from, to)| (to, from)).collect();
            Ok(Action::RenameChoices { table, col, renames: inverse_renames })
        }
        Action::AddTable { table, table_id, columns } => {
            if doc.tables.contains_key(&table) {
                return Err(GristError::invalid_action("duplicate table id"));
            }
            let mut t = Table::new(table, table_id.clone());
            for (col, name, spec) in &columns {
                let mut column = Column::new(name.clone(), spec.col_type.clone());
                column.is_formula = spec.is_formula;
                column.formula = spec.formula.clone();
                t.add_column(*col, column);
            }
            doc.tables.insert(table, t);
            summary.table_created(table);
            Ok(Action::RemoveTable { table })
        }
        Action::RemoveTable { table } => {
            let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let table_id = t.table_id.clone();
            let columns: Vec<(ColId, String, ColumnSpec)> = t
                .column_order
                .iter()
                .map(|&c| {
                    let col = &t.columns[&c];
                    (
                        c,
                        col.name.clone(),
                        ColumnSpec {
                            col_type: col.col_type.clone(),
                            is_formula: col.is_formula,
                            formula: col.formula.clone(),
                        },
                    )
                })
                .collect();
            retype_backreferences_to_removed_table(doc, table);
            doc.tables.remove(&table);
            doc.formulas.invalidate_table(table);
            summary.table_removed(table, table_id.clone());
            Ok(Action::AddTable { table, table_id, columns })
        }
        Action::RenameTable { table, new_name } => {
            let t = doc.tables.get_mut(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
            let old_name = std::mem::replace(&mut t.table_id, new_name.clone());
            summary.table_renamed(table, old_name.clone());
            Ok(Action::RenameTable { table, new_name: old_name })
        }
    }
}

fn capture_row(doc: &Document, table: TableId, row: RowId) -> BTreeMap<ColId, CellValue> {
    doc.tables
        .get(&table)
        .map(|t| t.columns.keys().map(|&c| (c, t.get(c, row))).collect())
        .unwrap_or_default()
}

fn clear_backrefs_for_row(doc: &mut Document, table: TableId, row: RowId) {
    let ref_cols: Vec<(ColId, TableId)> = doc
        .tables
        .get(&table)
        .map(|t| {
            t.columns
                .iter()
                .filter_map(|(&c, col)| match &col.col_type {
                    ColumnType::Ref(target) | ColumnType::RefList(target) => Some((c, *target)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    for (col, target) in ref_cols {
        if let Some(t) = doc.tables.get(&table) {
            let source = super::backrefs::RefSource { table, col };
            match t.get(col, row) {
                CellValue::Ref(r) if !r.is_empty_record() => doc.backrefs.remove_pointer(target, r, source, row),
                CellValue::RefList(list) => {
                    for r in list.as_slice() {
                        doc.backrefs.remove_pointer(target, *r, source, row);
                    }
                }
                _ => {}
            }
        }
    }
}

/// A new row starts every formula column unevaluated, the same way
/// `AddColumn`/`ModifyColumn`/`AddEmptyRule` schedule their formula's
/// already-existing rows at creation time; this is the mirror image for
/// a row arriving after the formula column already exists.
pub(crate) fn schedule_own_formula_columns(doc: &mut Document, table: TableId, row: RowId) {
    let formula_cols: Vec<ColId> = doc
        .tables
        .get(&table)
        .map(|t| t.columns.iter().filter(|(_, c)| c.is_formula).map(|(&c, _)| c).collect())
        .unwrap_or_default();
    for col in formula_cols {
        doc.graph.schedule(node(table, col), [row]);
    }
}

pub(crate) fn schedule_dependents_of_row(doc: &mut Document, table: TableId, row: RowId, touched: &BTreeMap<ColId, CellValue>) {
    let mut rows = FxHashSet::default();
    rows.insert(row);
    for &col in touched.keys() {
        doc.graph.invalidate(node(table, col), &rows, &doc.backrefs);
        if let Some(idx_key) = lookup_key_for(doc, table, col) {
            if let Some(idx) = doc.lookups.get_mut(&idx_key) {
                let t = doc.tables.get(&table).unwrap();
                let dirty_keys = idx.on_value_changed(t, row);
                for key in dirty_keys {
                    for &(dep, dep_row) in idx.subscribers_of(&key) {
                        doc.graph.schedule(dep, [dep_row]);
                    }
                }
            }
        }
    }
}

fn lookup_key_for(doc: &Document, table: TableId, col: ColId) -> Option<super::LookupKey> {
    doc.lookups.keys().find(|(t, cols, ..)| *t == table && cols.contains(&col)).cloned()
}

/// §3 invariant / §8 scenario 6: every `Ref`/`RefList` column that targets
/// `removed` is retyped to `Text`, backfilled with the stringified value
/// of the removed table's first non-formula column (its "visible
/// column", simplified here to "the first data column in declaration
/// order" rather than a configurable visible-column setting).
fn retype_backreferences_to_removed_table(doc: &mut Document, removed: TableId) {
    let sources = doc.backrefs.columns_targeting(removed).to_vec();
    let visible_col = doc
        .tables
        .get(&removed)
        .and_then(|t| t.column_order.iter().find(|&&c| !t.columns[&c].is_formula).copied());
    for source in sources {
        let Some(owner) = doc.tables.get(&source.table) else { continue };
        let rows: Vec<RowId> = owner.rows().collect();
        let mut new_values = Vec::new();
        for row in rows {
            let cell = owner.get(source.col, row);
            let text = match cell {
                CellValue::Ref(r) if !r.is_empty_record() => visible_col
                    .map(|vc| doc.tables.get(&removed).unwrap().get(vc, r).to_string())
                    .unwrap_or_default(),
                CellValue::RefList(list) => {
                    let items: Vec<String> = list
                        .as_slice()
                        .iter()
                        .map(|&r| {
                            visible_col
                                .map(|vc| doc.tables.get(&removed).unwrap().get(vc, r).to_string())
                                .unwrap_or_default()
                        })
                        .collect();
                    items.join(", ")
                }
                _ => String::new(),
            };
            new_values.push((row, text));
        }
        if let Some(owner) = doc.tables.get_mut(&source.table) {
            if let Some(col) = owner.columns.get_mut(&source.col) {
                col.col_type = ColumnType::Text;
            }
            for (row, text) in new_values {
                owner.set(source.col, row, CellValue::Text(text));
            }
        }
        doc.backrefs.unregister_column(removed, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grist_types::ColumnType;

    fn doc_with_orders() -> Document {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
        doc.tables.insert(TableId(1), t);
        doc
    }

    #[test]
    fn add_record_inverse_removes_it() {
        let mut doc = doc_with_orders();
        let mut summary = ActionSummary::default();
        let mut values = BTreeMap::new();
        values.insert(ColId(1), CellValue::Numeric(5.0));
        let inverse = apply(&mut doc, &mut summary, Action::AddRecord { table: TableId(1), row: RowId(1), values }).unwrap();
        assert!(doc.tables[&TableId(1)].has_row(RowId(1)));
        apply(&mut doc, &mut summary, inverse).unwrap();
        assert!(!doc.tables[&TableId(1)].has_row(RowId(1)));
    }

    #[test]
    fn update_record_inverse_restores_prior_value() {
        let mut doc = doc_with_orders();
        let mut summary = ActionSummary::default();
        let mut values = BTreeMap::new();
        values.insert(ColId(1), CellValue::Numeric(5.0));
        apply(&mut doc, &mut summary, Action::AddRecord { table: TableId(1), row: RowId(1), values }).unwrap();
        let mut update = BTreeMap::new();
        update.insert(ColId(1), CellValue::Numeric(9.0));
        let inverse = apply(&mut doc, &mut summary, Action::UpdateRecord { table: TableId(1), row: RowId(1), values: update }).unwrap();
        assert_eq!(doc.tables[&TableId(1)].get(ColId(1), RowId(1)), CellValue::Numeric(9.0));
        apply(&mut doc, &mut summary, inverse).unwrap();
        assert_eq!(doc.tables[&TableId(1)].get(ColId(1), RowId(1)), CellValue::Numeric(5.0));
    }

    #[test]
    fn remove_table_retypes_referencing_column_to_text() {
        let mut doc = Document::new();
        let mut address = Table::new(TableId(2), "Address");
        address.add_column(ColId(1), Column::new("city", ColumnType::Text));
        address.insert_row(RowId(1));
        address.set(ColId(1), RowId(1), CellValue::Text("Albany".into()));
        doc.tables.insert(TableId(2), address);

        let mut people = Table::new(TableId(1), "People");
        people.add_column(ColId(1), Column::new("address", ColumnType::Ref(TableId(2))));
        people.insert_row(RowId(1));
        people.set(ColId(1), RowId(1), CellValue::Ref(RowId(1)));
        doc.tables.insert(TableId(1), people);
        reindex_reference_column(&doc.tables[&TableId(1)].clone(), ColId(1), TableId(2), &mut doc.backrefs);

        let mut summary = ActionSummary::default();
        apply(&mut doc, &mut summary, Action::RemoveTable { table: TableId(2) }).unwrap();
        let people = &doc.tables[&TableId(1)];
        assert_eq!(people.columns[&ColId(1)].col_type, ColumnType::Text);
        assert_eq!(people.get(ColId(1), RowId(1)), CellValue::Text("Albany".into()));
    }

    #[test]
    fn add_empty_rule_lists_the_helper_column_on_the_parent() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Inventory");
        t.add_column(ColId(1), Column::new("Stock", ColumnType::Int));
        doc.tables.insert(TableId(1), t);

        let mut summary = ActionSummary::default();
        let spec = ColumnSpec { col_type: ColumnType::Any, is_formula: true, formula: Some(String::new()) };
        let inverse = apply(
            &mut doc,
            &mut summary,
            Action::AddEmptyRule {
                table: TableId(1),
                col: ColId(1),
                helper_col: ColId(2),
                name: "gristHelper_ConditionalRule".to_string(),
                spec,
            },
        )
        .unwrap();

        let t = &doc.tables[&TableId(1)];
        assert_eq!(t.columns[&ColId(1)].rules, vec![ColId(2)]);
        assert_eq!(t.columns[&ColId(2)].name, "gristHelper_ConditionalRule");
        assert!(t.columns[&ColId(2)].is_private);

        apply(&mut doc, &mut summary, inverse).unwrap();
        let t = &doc.tables[&TableId(1)];
        assert!(t.columns[&ColId(1)].rules.is_empty());
        assert!(!t.columns.contains_key(&ColId(2)));
    }

    #[test]
    fn removing_a_rule_helper_column_unlists_it_and_undo_restores_its_formula() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Inventory");
        t.add_column(ColId(1), Column::new("Stock", ColumnType::Int));
        doc.tables.insert(TableId(1), t);
        let mut summary = ActionSummary::default();
        let spec = ColumnSpec { col_type: ColumnType::Any, is_formula: true, formula: Some(String::new()) };
        apply(
            &mut doc,
            &mut summary,
            Action::AddEmptyRule { table: TableId(1), col: ColId(1), helper_col: ColId(2), name: "gristHelper_ConditionalRule".to_string(), spec },
        )
        .unwrap();
        doc.tables.get_mut(&TableId(1)).unwrap().columns.get_mut(&ColId(2)).unwrap().formula = Some("$Stock == 0".to_string());

        let inverse = apply(&mut doc, &mut summary, Action::RemoveColumn { table: TableId(1), col: ColId(2) }).unwrap();
        assert!(doc.tables[&TableId(1)].columns[&ColId(1)].rules.is_empty());
        assert!(!doc.tables[&TableId(1)].columns.contains_key(&ColId(2)));

        apply(&mut doc, &mut summary, inverse).unwrap();
        let t = &doc.tables[&TableId(1)];
        assert_eq!(t.columns[&ColId(1)].rules, vec![ColId(2)]);
        assert_eq!(t.columns[&ColId(2)].formula.as_deref(), Some("$Stock == 0"));
    }

    #[test]
    fn rename_choices_rewrites_choice_and_choice_list_cells_and_undoes_exactly() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Tasks");
        t.add_column(ColId(1), Column::new("status", ColumnType::Choice));
        t.add_column(ColId(2), Column::new("tags", ColumnType::ChoiceList));
        doc.tables.insert(TableId(1), t);

        let mut summary = ActionSummary::default();
        apply(
            &mut doc,
            &mut summary,
            Action::AddRecord {
                table: TableId(1),
                row: RowId(1),
                values: BTreeMap::from([
                    (ColId(1), CellValue::Text("a".into())),
                    (ColId(2), CellValue::ChoiceList(vec!["a".to_string(), "b".to_string()].into())),
                ]),
            },
        )
        .unwrap();
        apply(
            &mut doc,
            &mut summary,
            Action::AddRecord {
                table: TableId(1),
                row: RowId(2),
                values: BTreeMap::from([(ColId(1), CellValue::Text("c".into())), (ColId(2), CellValue::ChoiceList(Vec::new().into()))]),
            },
        )
        .unwrap();

        let renames = BTreeMap::from([("a".to_string(), "aa".to_string()), ("b".to_string(), "bb".to_string())]);
        let inverse = apply(&mut doc, &mut summary, Action::RenameChoices { table: TableId(1), col: ColId(1), renames: renames.clone() }).unwrap();
        let t = &doc.tables[&TableId(1)];
        assert_eq!(t.get(ColId(1), RowId(1)), CellValue::Text("aa".into()));
        assert_eq!(t.get(ColId(1), RowId(2)), CellValue::Text("c".into()));

        apply(&mut doc, &mut summary, inverse).unwrap();
        assert_eq!(doc.tables[&TableId(1)].get(ColId(1), RowId(1)), CellValue::Text("a".into()));

        apply(&mut doc, &mut summary, Action::RenameChoices { table: TableId(1), col: ColId(2), renames }).unwrap();
        let t = &doc.tables[&TableId(1)];
        let CellValue::ChoiceList(tags) = t.get(ColId(2), RowId(1)) else { panic!("expected ChoiceList") };
        assert_eq!(tags.as_slice().to_vec(), vec!["aa".to_string(), "bb".to_string()]);
        let CellValue::ChoiceList(tags) = t.get(ColId(2), RowId(2)) else { panic!("expected ChoiceList") };
        assert!(tags.as_slice().is_empty());
    }
}
