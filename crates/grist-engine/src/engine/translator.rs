//! User-action translator (§4.9): the layer between a user-facing intent
//! ("add this row", "rename this column") and the primitive [`Action`]s in
//! `super::action` that actually mutate the document. Owns row-id
//! allocation, position-column upkeep, default-formula invocation, and
//! propagating a rename into every formula source that mentions the old
//! name, none of which `action::apply` does on its own.

use std::collections::BTreeMap;

use grist_formula::ParseError;
use grist_types::{CellValue, ColId, ColumnType, DependencyNode, GristError, RowId, TableId};

use super::action::{self, Action, ActionError};
use super::column::Column;
use super::eval::{self, EvalCtx};
use super::position;
use super::summary::ActionSummary;
use super::table::ColumnSpec;
use super::Document;

fn parse_error_to_grist(e: ParseError) -> GristError {
    GristError::syntax(e.line, e.col)
}

fn position_col(doc: &Document, table: TableId) -> Option<ColId> {
    doc.tables.get(&table).and_then(|t| t.find_col_by_name("manualSort"))
}

fn as_position(value: CellValue) -> f64 {
    match value {
        CellValue::PositionNumber(n) | CellValue::ManualSortPos(n) => n,
        _ => 0.0,
    }
}

/// Adds `per_row_values.len()` rows to `table` at `insert_at` (row-order
/// index among existing rows; `None` appends at the end). Runs each new
/// row's default formulas for columns the caller didn't supply, and, if
/// the table has a `manualSort` column, reflows positions per §4.12.
/// Returns the inverse actions in application order: a position-repair
/// action for the existing rows that moved (if any), then the bulk
/// removal of the rows just added.
pub fn add_records(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    mut per_row_values: Vec<BTreeMap<ColId, CellValue>>,
    insert_at: Option<usize>,
) -> Result<(Vec<RowId>, Vec<Action>), ActionError> {
    let count = per_row_values.len();
    if count == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut inverses = Vec::new();

    if let Some(pos_col) = position_col(doc, table) {
        let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
        let mut existing: Vec<(RowId, f64)> = t
            .rows()
            .filter(|r| !r.is_empty_record())
            .map(|r| (r, as_position(t.get(pos_col, r))))
            .collect();
        existing.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let index = insert_at.unwrap_or(existing.len()).min(existing.len());
        let positions: Vec<f64> = existing.iter().map(|(_, p)| p).copied().collect();
        let plan = position::prepare_inserts(&positions, index, count);

        if !plan.adjustments.is_empty() {
            let rows: Vec<RowId> = plan.adjustments.iter().map(|&(i, _)| existing[i].0).collect();
            let mut values = BTreeMap::new();
            values.insert(pos_col, plan.adjustments.iter().map(|&(_, p)| CellValue::PositionNumber(p)).collect());
            inverses.push(action::apply(doc, summary, Action::BulkUpdateRecord { table, rows, values })?);
        }
        for (values, pos) in per_row_values.iter_mut().zip(plan.new_positions) {
            values.entry(pos_col).or_insert(CellValue::PositionNumber(pos));
        }
    }

    let rows = doc
        .tables
        .get_mut(&table)
        .map(|t| t.allocate_rows(count))
        .ok_or_else(|| GristError::invalid_action("no such table"))?;

    for (&row, values) in rows.iter().zip(per_row_values.iter()) {
        let t = doc.tables.get_mut(&table).unwrap();
        action::set_row(t, row, values, summary);
    }

    for &row in &rows {
        run_default_formulas(doc, summary, table, row);
        action::reindex_refs_for_row(doc, table, row);
        action::schedule_own_formula_columns(doc, table, row);
        let t = doc.tables.get(&table).unwrap();
        let row_values: BTreeMap<ColId, CellValue> = t.column_order.iter().map(|&c| (c, t.get(c, row))).collect();
        action::schedule_dependents_of_row(doc, table, row, &row_values);
    }

    inverses.push(Action::BulkRemoveRecord { table, rows: rows.clone() });
    Ok((rows, inverses))
}

/// §4.9 default formulas: a non-formula column may still carry a formula
/// that seeds its initial value (`default_formula`), run once against the
/// row's already-supplied cells rather than on every recompute.
fn run_default_formulas(doc: &mut Document, summary: &mut ActionSummary, table: TableId, row: RowId) {
    let Some(targets) = doc.tables.get(&table).map(|t| {
        t.column_order
            .iter()
            .filter_map(|&c| t.columns[&c].default_formula.clone().map(|f| (c, f)))
            .collect::<Vec<_>>()
    }) else {
        return;
    };
    for (col, source) in targets {
        let Ok(cached) = doc.formulas.get_or_transform(table, col, &source) else { continue };
        let node = DependencyNode::new(table, col);
        let value = {
            let mut ctx = EvalCtx::new(doc, summary, table, row, node);
            eval::eval_body(&mut ctx, &cached.body)
        };
        let cell = match value {
            Ok(v) => v.as_cell(),
            Err(e) => eval::error_to_cell(e),
        };
        if let Some(t) = doc.tables.get_mut(&table) {
            let col_type = t.columns[&col].col_type.clone();
            let before = t.get(col, row);
            let after = col_type.convert(cell);
            t.set(col, row, after.clone());
            summary.record(table, col, row, before, after);
        }
    }
}

/// Updates one record, coercing each supplied value to its column's type
/// before writing it (§4.9 "coerces each value to the column's type on
/// the way in").
pub fn update_record(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    row: RowId,
    values: BTreeMap<ColId, CellValue>,
) -> Result<Action, ActionError> {
    let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
    let coerced: BTreeMap<ColId, CellValue> = values
        .into_iter()
        .map(|(col, v)| {
            let converted = t.columns.get(&col).map(|c| c.col_type.convert(v.clone())).unwrap_or(v);
            (col, converted)
        })
        .collect();
    action::apply(doc, summary, Action::UpdateRecord { table, row, values: coerced })
}

/// Removes a set of records in one user gesture, including unregistering
/// any `Ref`/`RefList` pointers the rows held into other tables (handled
/// by `action::apply`'s own `RemoveRecord` arm) and returning a single
/// bulk inverse rather than one per row.
pub fn remove_records(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    rows: Vec<RowId>,
) -> Result<Action, ActionError> {
    action::apply(doc, summary, Action::BulkRemoveRecord { table, rows })
}

/// Adds a column, assigning `col` a fresh id from the table's schema if
/// the caller passes `ColId(0)` as a sentinel for "allocate one".
pub fn add_column(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    name: String,
    spec: ColumnSpec,
) -> Result<(ColId, Action), ActionError> {
    let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
    let next = t.column_order.iter().map(|c| c.0).max().unwrap_or(0) + 1;
    let col = ColId(next);
    let action = action::apply(doc, summary, Action::AddColumn { table, col, name, spec })?;
    Ok((col, action))
}

/// `AddEmptyRule` (§4.11, §8 Scenario 4): attaches a fresh
/// `gristHelper_ConditionalRule` formula column (type `Any`, empty
/// formula) to `col` and lists it in `col`'s `rules`. The caller fills in
/// the actual rule expression afterward with a plain `ModifyColumn` on
/// the returned helper column id, exactly as `UpdateRecord` on the rule's
/// formula field does in the original.
pub fn add_empty_rule(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    col: ColId,
) -> Result<(ColId, Action), ActionError> {
    let t = doc.tables.get(&table).ok_or_else(|| GristError::invalid_action("no such table"))?;
    let next = t.column_order.iter().map(|c| c.0).max().unwrap_or(0) + 1;
    let helper_col = ColId(next);
    let spec = ColumnSpec { col_type: ColumnType::Any, is_formula: true, formula: Some(String::new()) };
    let action = action::apply(
        doc,
        summary,
        Action::AddEmptyRule { table, col, helper_col, name: "gristHelper_ConditionalRule".to_string(), spec },
    )?;
    Ok((helper_col, action))
}

/// Renames a column's schema entry and rewrites every formula that
/// references it by its old name, both on its own table and, through a
/// `Ref`/`RefList` hop, on every table that points at this one (§4.9:
/// "update the schema AND rewrite every formula that references the old
/// name").
pub fn rename_column(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    col: ColId,
    new_name: String,
) -> Result<Action, ActionError> {
    let old_name = doc
        .tables
        .get(&table)
        .and_then(|t| t.columns.get(&col))
        .map(|c| c.name.clone())
        .ok_or_else(|| GristError::invalid_action("no such column"))?;

    rewrite_formulas_in_table(doc, table, &[old_name.as_str()], &new_name)?;

    let referrers = doc.backrefs.columns_targeting(table).to_vec();
    for src in referrers {
        let Some(ref_col_name) = doc.tables.get(&src.table).and_then(|t| t.columns.get(&src.col)).map(|c| c.name.clone()) else {
            continue;
        };
        rewrite_formulas_in_table(doc, src.table, &[ref_col_name.as_str(), old_name.as_str()], &new_name)?;
    }

    action::apply(doc, summary, Action::RenameColumn { table, col, new_name })
}

fn rewrite_formulas_in_table(doc: &mut Document, table: TableId, path: &[&str], new_name: &str) -> Result<(), ActionError> {
    let Some(sources) = doc.tables.get(&table).map(|t| {
        t.column_order
            .iter()
            .filter_map(|&c| t.columns[&c].formula.clone().map(|f| (c, f)))
            .collect::<Vec<_>>()
    }) else {
        return Ok(());
    };
    for (col, source) in sources {
        let rewritten = grist_formula::rename_in_source(&source, path, new_name).map_err(|e| parse_error_to_grist(e.0))?;
        if rewritten != source {
            if let Some(c) = doc.tables.get_mut(&table).and_then(|t| t.columns.get_mut(&col)) {
                c.formula = Some(rewritten);
            }
            doc.formulas.invalidate_column(table, col);
        }
    }
    Ok(())
}

/// Renames a table and rewrites every bare reference to its old name
/// (e.g. `Orders.lookupRecords(...)`) across every formula in the
/// document, not just formulas on the renamed table itself.
pub fn rename_table(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table: TableId,
    new_name: String,
) -> Result<Action, ActionError> {
    let old_name = doc.tables.get(&table).map(|t| t.table_id.clone()).ok_or_else(|| GristError::invalid_action("no such table"))?;

    let all_tables: Vec<TableId> = doc.tables.keys().copied().collect();
    for other in all_tables {
        let Some(sources) = doc.tables.get(&other).map(|t| {
            t.column_order
                .iter()
                .filter_map(|&c| t.columns[&c].formula.clone().map(|f| (c, f)))
                .collect::<Vec<_>>()
        }) else {
            continue;
        };
        for (col, source) in sources {
            let rewritten = grist_formula::rename_table_ref(&source, &old_name, &new_name).map_err(|e| parse_error_to_grist(e.0))?;
            if rewritten != source {
                if let Some(c) = doc.tables.get_mut(&other).and_then(|t| t.columns.get_mut(&col)) {
                    c.formula = Some(rewritten);
                }
                doc.formulas.invalidate_column(other, col);
            }
        }
    }

    action::apply(doc, summary, Action::RenameTable { table, new_name })
}

/// Creates a table from a list of `(name, spec)` pairs, sanitizing `name`
/// into `table_id`/column ids if the caller didn't already pick unique
/// ones, then allocating the table's own id from the document.
pub fn add_table(
    doc: &mut Document,
    summary: &mut ActionSummary,
    table_id: String,
    columns: Vec<(String, ColumnSpec)>,
) -> Result<(TableId, Action), ActionError> {
    if doc.find_table_by_name(&table_id).is_some() {
        return Err(GristError::invalid_action(format!("table id {table_id} already in use")));
    }
    let table = doc.allocate_table_id();
    let cols: Vec<(ColId, String, ColumnSpec)> = columns
        .into_iter()
        .enumerate()
        .map(|(i, (name, spec))| (ColId(i as u32 + 1), name, spec))
        .collect();
    let action = action::apply(doc, summary, Action::AddTable { table, table_id, columns: cols })?;
    Ok((table, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::table::Table;
    use grist_types::ColumnType;

    fn doc_with_orders() -> Document {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
        t.add_column(ColId(2), Column::formula("Double", ColumnType::Numeric, "rec.Amount * 2"));
        doc.tables.insert(TableId(1), t);
        doc
    }

    #[test]
    fn add_records_runs_default_formula_for_unsupplied_column() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
        let mut created_at = Column::new("Status", ColumnType::Text);
        created_at.default_formula = Some("\"new\"".to_string());
        t.add_column(ColId(2), created_at);
        doc.tables.insert(TableId(1), t);
        let mut summary = ActionSummary::default();

        let mut values = BTreeMap::new();
        values.insert(ColId(1), CellValue::Numeric(5.0));
        let (rows, _inverses) = add_records(&mut doc, &mut summary, TableId(1), vec![values], None).unwrap();

        let t = &doc.tables[&TableId(1)];
        assert_eq!(t.get(ColId(2), rows[0]), CellValue::Text("new".into()));
    }

    #[test]
    fn add_records_assigns_increasing_positions() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("manualSort", ColumnType::PositionNumber));
        doc.tables.insert(TableId(1), t);
        let mut summary = ActionSummary::default();

        let (rows, _) = add_records(&mut doc, &mut summary, TableId(1), vec![BTreeMap::new(), BTreeMap::new()], None).unwrap();
        let t = &doc.tables[&TableId(1)];
        let p0 = as_position(t.get(ColId(1), rows[0]));
        let p1 = as_position(t.get(ColId(1), rows[1]));
        assert!(p0 < p1);
    }

    #[test]
    fn rename_column_rewrites_same_table_formula() {
        let mut doc = doc_with_orders();
        let mut summary = ActionSummary::default();
        rename_column(&mut doc, &mut summary, TableId(1), ColId(1), "Total".to_string()).unwrap();
        let t = &doc.tables[&TableId(1)];
        assert_eq!(t.columns[&ColId(1)].name, "Total");
        assert_eq!(t.columns[&ColId(2)].formula.as_deref(), Some("rec.Total * 2"));
    }

    #[test]
    fn rename_column_rewrites_formula_on_a_referencing_table() {
        let mut doc = Document::new();
        let mut address = Table::new(TableId(2), "Address");
        address.add_column(ColId(1), Column::new("city", ColumnType::Text));
        doc.tables.insert(TableId(2), address);

        let mut people = Table::new(TableId(1), "People");
        people.add_column(ColId(1), Column::new("addr", ColumnType::Ref(TableId(2))));
        people.add_column(ColId(2), Column::formula("city", ColumnType::Text, "$addr.city"));
        doc.tables.insert(TableId(1), people);
        super::super::relation::reindex_reference_column(&doc.tables[&TableId(1)], ColId(1), TableId(2), &mut doc.backrefs);

        let mut summary = ActionSummary::default();
        rename_column(&mut doc, &mut summary, TableId(2), ColId(1), "ciudad".to_string()).unwrap();

        assert_eq!(doc.tables[&TableId(2)].columns[&ColId(1)].name, "ciudad");
        assert_eq!(doc.tables[&TableId(1)].columns[&ColId(2)].formula.as_deref(), Some("$addr.ciudad"));
    }

    #[test]
    fn rename_table_rewrites_bare_reference_in_another_table() {
        let mut doc = doc_with_orders();
        let mut people = Table::new(TableId(2), "People");
        people.add_column(ColId(1), Column::formula("OrderCount", ColumnType::Int, "len(Orders.lookupRecords())"));
        doc.tables.insert(TableId(2), people);
        let mut summary = ActionSummary::default();

        rename_table(&mut doc, &mut summary, TableId(1), "Purchases".to_string()).unwrap();
        assert_eq!(doc.tables[&TableId(1)].table_id, "Purchases");
        assert_eq!(
            doc.tables[&TableId(2)].columns[&ColId(1)].formula.as_deref(),
            Some("len(Purchases.lookupRecords())")
        );
    }

    #[test]
    fn add_table_rejects_duplicate_name() {
        let mut doc = doc_with_orders();
        let mut summary = ActionSummary::default();
        let result = add_table(&mut doc, &mut summary, "Orders".to_string(), Vec::new());
        assert!(result.is_err());
    }
}
