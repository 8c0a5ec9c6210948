//! Dependency graph (§4.3): reverse edges keyed by dependency node, a
//! pending-invalidation set keyed by dependent node, and the
//! currently-evaluating stack used for cycle detection.

use grist_types::{DependencyNode, RowId};
use rustc_hash::{FxHashMap, FxHashSet};

use super::backrefs::{BackRefMap, RefSource};
use super::relation::Relation;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    forward: FxHashMap<DependencyNode, Vec<(DependencyNode, Relation)>>,
    reverse: FxHashMap<DependencyNode, Vec<(DependencyNode, Relation)>>,
    pending: FxHashMap<DependencyNode, FxHashSet<RowId>>,
    active: Vec<(DependencyNode, RowId)>,
}

impl DependencyGraph {
    pub fn add_edge(&mut self, dependent: DependencyNode, dependency: DependencyNode, relation: Relation) {
        let fwd = self.forward.entry(dependent).or_default();
        if !fwd.iter().any(|(d, r)| *d == dependency && *r == relation) {
            fwd.push((dependency, relation));
        }
        let rev = self.reverse.entry(dependency).or_default();
        if !rev.iter().any(|(d, r)| *d == dependent && *r == relation) {
            rev.push((dependent, relation));
        }
    }

    /// §4.3 `clear_dependencies`: called at the start of each recomputation
    /// of `dependent`, so a formula that stops reading a column drops the
    /// stale edge instead of leaving a ghost dependency.
    pub fn clear_dependencies(&mut self, dependent: DependencyNode) {
        if let Some(deps) = self.forward.remove(&dependent) {
            for (dependency, relation) in deps {
                if let Some(rev) = self.reverse.get_mut(&dependency) {
                    rev.retain(|(d, r)| !(*d == dependent && *r == relation));
                }
            }
        }
    }

    /// §4.3 `invalidate`: walks the reverse index from `dependency_node`
    /// and schedules every dependent for the rows its relation maps the
    /// changed rows onto.
    pub fn invalidate(
        &mut self,
        dependency_node: DependencyNode,
        changed_rows: &FxHashSet<RowId>,
        backrefs: &BackRefMap,
    ) {
        let Some(deps) = self.reverse.get(&dependency_node) else {
            return;
        };
        for (dependent, relation) in deps.clone() {
            // The back-reference registry is keyed on the `Ref`/`RefList`
            // column itself (`via`), not on the dependent formula's own
            // column, since a formula can read through a reference column
            // that isn't the one it's stored in.
            let via = match relation {
                Relation::Reference(via) | Relation::ReferenceList(via) => via,
                Relation::Identity => dependent.col,
            };
            let source = RefSource {
                table: dependent.table,
                col: via,
            };
            let rows = relation.translate(dependency_node.table, source, changed_rows, backrefs);
            if rows.is_empty() {
                continue;
            }
            self.pending.entry(dependent).or_default().extend(rows);
        }
    }

    /// Directly schedules specific rows of `node` (used by the lookup
    /// index, which maintains its own subscriber registry rather than
    /// going through a `Relation`, §4.2).
    pub fn schedule(&mut self, node: DependencyNode, rows: impl IntoIterator<Item = RowId>) {
        self.pending.entry(node).or_default().extend(rows);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.values().any(|s| !s.is_empty())
    }

    /// Drains one `(node, rows)` batch in an arbitrary but stable order;
    /// callers recompute rows ascending within the batch (§5 ordering
    /// guarantee).
    pub fn pop_batch(&mut self) -> Option<(DependencyNode, Vec<RowId>)> {
        let node = *self.pending.keys().next()?;
        let rows = self.pending.remove(&node).unwrap_or_default();
        let mut rows: Vec<RowId> = rows.into_iter().collect();
        rows.sort();
        Some((node, rows))
    }

    pub fn push_active(&mut self, node: DependencyNode, row: RowId) -> Result<(), ()> {
        if self.active.contains(&(node, row)) {
            return Err(());
        }
        self.active.push((node, row));
        Ok(())
    }

    pub fn pop_active(&mut self) {
        self.active.pop();
    }

    pub fn is_active(&self, node: DependencyNode, row: RowId) -> bool {
        self.active.contains(&(node, row))
    }

    pub fn has_pending_for(&self, node: DependencyNode, row: RowId) -> bool {
        self.pending.get(&node).map(|s| s.contains(&row)).unwrap_or(false)
    }

    /// Removes a single row from `node`'s pending set, used when a
    /// formula read forces that cell's computation ahead of the drain
    /// loop reaching it (§4.4).
    pub fn take_pending_row(&mut self, node: DependencyNode, row: RowId) -> bool {
        self.pending.get_mut(&node).map(|s| s.remove(&row)).unwrap_or(false)
    }
}

/// §4.3 reference-lookup helper used when a formula reads a plain column
/// of its own record: registers the trivial identity relation.
pub fn depend_on_own_column(graph: &mut DependencyGraph, dependent: DependencyNode, dependency: DependencyNode) {
    graph.add_edge(dependent, dependency, Relation::Identity);
}

pub fn depend_through_reference(
    graph: &mut DependencyGraph,
    dependent: DependencyNode,
    dependency: DependencyNode,
    via: grist_types::ColId,
    is_list: bool,
) {
    let relation = if is_list {
        Relation::ReferenceList(via)
    } else {
        Relation::Reference(via)
    };
    graph.add_edge(dependent, dependency, relation);
}
