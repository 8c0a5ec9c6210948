//! Recalculation loop (§4.4): drains the dependency graph's pending set,
//! recomputing one `(node, row)` at a time in ascending row-id order
//! within a node. A formula that reads another formula cell not yet
//! computed this pass forces it via [`compute_and_store`] directly
//! (`super::eval::read_column`), which is also how a cycle is discovered:
//! re-entering a cell already on the active stack returns a
//! `CircularRefError` instead of recursing (§4.3, §8 scenario 5).

use grist_types::{CellAddr, DependencyNode, GristError, RowId};
use rustc_hash::FxHashSet;

use super::eval::{self, EvalCtx};
use super::summary::ActionSummary;
use super::Document;

/// Set by the translator while replaying a trigger-formula side effect
/// (§4.4: "formulas must not trigger user actions during recomputation").
/// Helpers that would enqueue an insert consult this before doing so.
#[derive(Debug, Default)]
pub struct RecalcGuard {
    triggered_tables: FxHashSet<grist_types::TableId>,
}

impl RecalcGuard {
    pub fn mark_triggered(&mut self, table: grist_types::TableId) {
        self.triggered_tables.insert(table);
    }

    pub fn is_triggered_by_table_action(&self, table: grist_types::TableId) -> bool {
        self.triggered_tables.contains(&table)
    }
}

/// Runs the loop to quiescence, recording before/after cell changes into
/// `summary`. Returns the set of `(table, col)` nodes touched.
pub fn run(doc: &mut Document, summary: &mut ActionSummary) -> Vec<DependencyNode> {
    let mut touched = Vec::new();
    while doc.graph.has_pending() {
        let Some((node, rows)) = doc.graph.pop_batch() else {
            break;
        };
        touched.push(node);
        for row in rows {
            if !doc.tables.get(&node.table).map(|t| t.has_row(row)).unwrap_or(false) {
                continue;
            }
            compute_and_store(doc, summary, node, row);
        }
    }
    touched
}

/// Computes `node`'s formula for `row`, stores the (possibly error) result,
/// and schedules dependents if it changed. Returns the stored value. A
/// no-op (returns the cell's current value unchanged) if `node` is not a
/// formula column or the row no longer exists.
pub fn compute_and_store(
    doc: &mut Document,
    summary: &mut ActionSummary,
    node: DependencyNode,
    row: RowId,
) -> grist_types::CellValue {
    let Some((source, col_type)) = doc
        .tables
        .get(&node.table)
        .and_then(|t| t.columns.get(&node.col))
        .filter(|c| c.is_formula)
        .map(|c| (c.formula.clone().unwrap_or_default(), c.col_type.clone()))
    else {
        return doc
            .tables
            .get(&node.table)
            .map(|t| t.get(node.col, row))
            .unwrap_or(grist_types::CellValue::Blank);
    };

    if doc.graph.push_active(node, row).is_err() {
        return eval::error_to_cell(GristError::circular_ref(CellAddr::new(node.table, node.col, row)));
    }
    doc.graph.clear_dependencies(node);
    doc.graph.take_pending_row(node, row);

    let before = doc.tables.get(&node.table).map(|t| t.get(node.col, row)).unwrap_or(grist_types::CellValue::Blank);

    let result = match doc.formulas.get_or_transform(node.table, node.col, &source) {
        Ok(cached) => {
            let mut ctx = EvalCtx::new(doc, summary, node.table, row, node);
            eval::eval_body(&mut ctx, &cached.body)
        }
        Err(e) => Err(e),
    };

    doc.graph.pop_active();

    let new_cell = match result {
        Ok(value) => col_type.convert(value.as_cell()),
        Err(err) => eval::error_to_cell(err),
    };

    if let Some(table) = doc.tables.get_mut(&node.table) {
        table.set(node.col, row, new_cell.clone());
    }

    if !before.encoding_equal(&new_cell) {
        summary.record(node.table, node.col, row, before, new_cell.clone());
        let mut changed = FxHashSet::default();
        changed.insert(row);
        doc.graph.invalidate(node, &changed, &doc.backrefs);
    }

    new_cell
}

/// Whether a stored value currently matches its column's declared type,
/// without going through a formula read (§3 "wrong-type cells").
pub fn is_right_typed(doc: &Document, node: DependencyNode, row: RowId) -> bool {
    doc.tables
        .get(&node.table)
        .and_then(|t| t.columns.get(&node.col))
        .map(|c| c.is_right_typed(row))
        .unwrap_or(true)
}
