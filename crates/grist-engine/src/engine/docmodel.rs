//! Doc model helpers (§4.10): a thin record-oriented facade over the
//! internal metadata tables, plus the summary-table (group-by) maintainer
//! from the "supplemented features" of the enclosing specification.

use std::collections::BTreeMap;

use grist_types::{CellValue, ColId, RowId, TableId};
use rustc_hash::FxHashMap;

use super::action::{self, Action, ActionError};
use super::lookup::compare_values;
use super::summary::ActionSummary;
use super::Document;

/// Adds one record to `table`, returning the generated action and its
/// inverse for the caller's undo list.
pub fn add(doc: &mut Document, summary: &mut ActionSummary, table: TableId, row: RowId, values: BTreeMap<ColId, CellValue>) -> Result<Action, ActionError> {
    action::apply(doc, summary, Action::AddRecord { table, row, values })
}

pub fn update(doc: &mut Document, summary: &mut ActionSummary, table: TableId, row: RowId, values: BTreeMap<ColId, CellValue>) -> Result<Action, ActionError> {
    action::apply(doc, summary, Action::UpdateRecord { table, row, values })
}

pub fn remove(doc: &mut Document, summary: &mut ActionSummary, table: TableId, row: RowId) -> Result<Action, ActionError> {
    action::apply(doc, summary, Action::RemoveRecord { table, row })
}

/// Inserts a record at the end of `table` (largest allocated row id), a
/// simplification of the ordered `insert(record_set, position, ...)`
/// facade: this engine has no view-section-scoped ordering of metadata
/// records, only the plain table row order `position.rs` already serves
/// for user tables.
pub fn insert(doc: &mut Document, summary: &mut ActionSummary, table: TableId, values: BTreeMap<ColId, CellValue>) -> Result<(RowId, Action), ActionError> {
    let row = doc.tables.get(&table).map(|t| t.next_row_id()).ok_or_else(|| ActionError::invalid_action("no such table"))?;
    let action = action::apply(doc, summary, Action::AddRecord { table, row, values })?;
    Ok((row, action))
}

/// Inserts immediately after `after` in declaration order; since the
/// underlying row store is an ordered set keyed by row id rather than an
/// explicit position list, "after" here means "with a fresh id", matching
/// how metadata tables without a manual-sort column are displayed (§4.10
/// delegates true positional ordering to `position.rs`'s `manualSort`
/// column when a table has one).
pub fn insert_after(doc: &mut Document, summary: &mut ActionSummary, table: TableId, _after: Option<RowId>, values: BTreeMap<ColId, CellValue>) -> Result<(RowId, Action), ActionError> {
    insert(doc, summary, table, values)
}

/// Finds the row of `_grist_Tables` describing `table_id`.
pub fn get_table_rec(doc: &Document, tables_meta: TableId, table_id: &str) -> Option<RowId> {
    let t = doc.tables.get(&tables_meta)?;
    let col = t.find_col_by_name("tableId")?;
    t.rows().find(|&r| t.get(col, r) == CellValue::Text(table_id.to_string()))
}

/// Finds the row of `_grist_Tables_column` describing `(table_ref, col_id)`
/// where `table_ref` is that table's row in `_grist_Tables`.
pub fn get_column_rec(doc: &Document, columns_meta: TableId, parent_id_col: ColId, table_ref: RowId, col_id: &str) -> Option<RowId> {
    let t = doc.tables.get(&columns_meta)?;
    let col_id_col = t.find_col_by_name("colId")?;
    t.rows().find(|&r| {
        t.get(parent_id_col, r) == CellValue::Ref(table_ref) && t.get(col_id_col, r) == CellValue::Text(col_id.to_string())
    })
}

/// Drains `doc.auto_remove_queue` (§4.10: formulas marking metadata rows
/// obsolete mid-recalc defer their removal until the user action
/// finishes), returning the generated `RemoveRecord` actions. Called by
/// `refresh_summary_table` for the groups it just enqueued, and again by
/// the `grist` facade's `apply_user_actions` as a final catch-all so any
/// row enqueued anywhere during the bundle is resolved before it returns.
pub fn drain_auto_remove_queue(doc: &mut Document, summary: &mut ActionSummary) -> Result<Vec<Action>, ActionError> {
    let queue = std::mem::take(&mut doc.auto_remove_queue);
    let mut actions = Vec::new();
    for (table, row) in queue {
        if doc.tables.get(&table).map(|t| t.has_row(row)).unwrap_or(false) {
            actions.push(remove(doc, summary, table, row)?);
        }
    }
    Ok(actions)
}

/// Specifies one summary table kept in sync with a source table: group by
/// `group_cols`, track a row count in `count_col`, and a running sum per
/// `(source_col, sum_col)` pair.
#[derive(Debug, Clone)]
pub struct SummarySpec {
    pub source: TableId,
    pub group_cols: Vec<ColId>,
    pub summary: TableId,
    pub summary_group_cols: Vec<ColId>,
    pub count_col: Option<ColId>,
    pub sums: Vec<(ColId, ColId)>,
}

/// Recomputes every group in `spec`, adding/updating/removing rows of
/// `spec.summary` to match the distinct key tuples currently present in
/// `spec.source` (ignoring the empty record). Groups with zero remaining
/// source rows are removed; this treats the summary table as fully
/// derived rather than incrementally patched, acceptable since it is
/// invoked once per settled user action rather than per cell write.
pub fn refresh_summary_table(doc: &mut Document, summary: &mut ActionSummary, spec: &SummarySpec) -> Result<(), ActionError> {
    let Some(source) = doc.tables.get(&spec.source) else { return Ok(()) };
    let mut groups: FxHashMap<Vec<CellValue>, (usize, Vec<f64>)> = FxHashMap::default();
    for row in source.rows() {
        if row.is_empty_record() {
            continue;
        }
        let key: Vec<CellValue> = spec.group_cols.iter().map(|&c| source.get(c, row)).collect();
        let entry = groups.entry(key).or_insert_with(|| (0, vec![0.0; spec.sums.len()]));
        entry.0 += 1;
        for (i, &(src_col, _)) in spec.sums.iter().enumerate() {
            entry.1[i] += as_numeric(source.get(src_col, row));
        }
    }

    let existing: Vec<(RowId, Vec<CellValue>)> = doc
        .tables
        .get(&spec.summary)
        .map(|t| {
            t.rows()
                .filter(|r| !r.is_empty_record())
                .map(|r| (r, spec.summary_group_cols.iter().map(|&c| t.get(c, r)).collect()))
                .collect()
        })
        .unwrap_or_default();

    for (row, key) in &existing {
        if !groups.contains_key(key) {
            // Deferred rather than removed in place: a group row can still be
            // read by a dependent formula recomputed later in this same pass,
            // so it is queued and only actually removed once the queue is
            // drained below.
            doc.auto_remove_queue.push((spec.summary, *row));
        }
    }
    drain_auto_remove_queue(doc, summary)?;

    let mut keys: Vec<Vec<CellValue>> = groups.keys().cloned().collect();
    sort_group_keys(&mut keys);

    for key in &keys {
        let (count, sums) = &groups[key];
        let row = existing.iter().find(|(_, k)| k == key).map(|(r, _)| *r);
        let mut values = BTreeMap::new();
        if let Some(count_col) = spec.count_col {
            values.insert(count_col, CellValue::Int(*count as i64));
        }
        for (i, &(_, sum_col)) in spec.sums.iter().enumerate() {
            values.insert(sum_col, CellValue::Numeric(sums[i]));
        }
        match row {
            Some(row) => {
                update(doc, summary, spec.summary, row, values)?;
            }
            None => {
                for (i, v) in key.iter().enumerate() {
                    values.insert(spec.summary_group_cols[i], v.clone());
                }
                insert(doc, summary, spec.summary, values)?;
            }
        }
    }
    Ok(())
}

fn as_numeric(value: CellValue) -> f64 {
    match value {
        CellValue::Numeric(n) => n,
        CellValue::Int(i) => i as f64,
        _ => 0.0,
    }
}

/// Sorts summary group keys for deterministic row ordering when two
/// groups are created in the same refresh pass.
pub fn sort_group_keys(keys: &mut [Vec<CellValue>]) {
    keys.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b) {
            let ord = compare_values(x, y);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}
