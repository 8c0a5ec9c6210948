//! Relations (§3): how a dependency edge translates row ids on its
//! dependency node back into row ids on its dependent node during
//! invalidation.

use grist_types::{ColId, RowId, TableId};
use rustc_hash::FxHashSet;

use super::backrefs::{BackRefMap, RefSource};
use super::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Same table, row n depends on row n of the dependency column
    /// (the ordinary case: a formula reading a plain column of its own
    /// record).
    Identity,
    /// The dependent table has a `Ref` column (`via`) into the dependency
    /// table; translate by following back-references.
    Reference(ColId),
    /// Same, but through a `RefList` column.
    ReferenceList(ColId),
}

impl Relation {
    /// Given rows that changed on the dependency node's table, returns the
    /// rows of the dependent node's table that must be recomputed.
    pub fn translate(
        &self,
        dependency_table: TableId,
        dependent: RefSource,
        changed_rows: &FxHashSet<RowId>,
        backrefs: &BackRefMap,
    ) -> FxHashSet<RowId> {
        match self {
            Relation::Identity => changed_rows.clone(),
            Relation::Reference(_) | Relation::ReferenceList(_) => {
                let mut out = FxHashSet::default();
                for &row in changed_rows {
                    for (src, src_row) in backrefs.sources_of(dependency_table, row) {
                        if src == dependent {
                            out.insert(src_row);
                        }
                    }
                }
                out
            }
        }
    }
}

/// Registers a `Ref`/`RefList` column's current values as back-reference
/// pointers (§4.1: "`Ref`/`RefList` also register themselves as
/// back-references on their target table").
pub fn reindex_reference_column(
    table: &Table,
    col: ColId,
    target: TableId,
    backrefs: &mut BackRefMap,
) {
    let source = RefSource {
        table: table.id,
        col,
    };
    backrefs.register_column(target, source);
    for row in table.rows() {
        match table.get(col, row) {
            grist_types::CellValue::Ref(r) if !r.is_empty_record() => {
                backrefs.add_pointer(target, r, source, row);
            }
            grist_types::CellValue::RefList(list) => {
                for r in list.as_slice() {
                    backrefs.add_pointer(target, *r, source, row);
                }
            }
            _ => {}
        }
    }
}
