//! Two-way map for `Ref`/`RefList` back-references (§4.1, Section C of
//! `SPEC_FULL.md`). Every `Ref`/`RefList` column registers here so that
//! (a) the dependency graph can invert a `Reference`/`ReferenceList`
//! relation (find which source rows point at a changed target row) and
//! (b) `RemoveTable` can find every column that needs retyping.

use grist_types::{ColId, RowId, TableId};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefSource {
    pub table: TableId,
    pub col: ColId,
}

#[derive(Debug, Default)]
pub struct BackRefMap {
    /// `(target_table, target_row) -> sources pointing at it`, one entry
    /// per `(source_table, source_col, source_row)` currently referencing.
    by_target: FxHashMap<(TableId, RowId), Vec<(RefSource, RowId)>>,
    /// Every `(source_table, source_col)` registered as a `Ref`/`RefList`
    /// into a given target table, used by `RemoveTable` (§4.9).
    columns_targeting: FxHashMap<TableId, Vec<RefSource>>,
}

impl BackRefMap {
    pub fn register_column(&mut self, target: TableId, source: RefSource) {
        let list = self.columns_targeting.entry(target).or_default();
        if !list.contains(&source) {
            list.push(source);
        }
    }

    pub fn unregister_column(&mut self, target: TableId, source: RefSource) {
        if let Some(list) = self.columns_targeting.get_mut(&target) {
            list.retain(|s| *s != source);
        }
    }

    pub fn columns_targeting(&self, target: TableId) -> &[RefSource] {
        self.columns_targeting
            .get(&target)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_pointer(&mut self, target: TableId, target_row: RowId, source: RefSource, source_row: RowId) {
        self.by_target
            .entry((target, target_row))
            .or_default()
            .push((source, source_row));
    }

    pub fn remove_pointer(&mut self, target: TableId, target_row: RowId, source: RefSource, source_row: RowId) {
        if let Some(list) = self.by_target.get_mut(&(target, target_row)) {
            list.retain(|(s, r)| !(*s == source && *r == source_row));
        }
    }

    /// Every `(source_col, source_row)` currently pointing at `target_row`.
    pub fn sources_of(&self, target: TableId, target_row: RowId) -> impl Iterator<Item = (RefSource, RowId)> + '_ {
        self.by_target
            .get(&(target, target_row))
            .into_iter()
            .flatten()
            .copied()
    }
}
