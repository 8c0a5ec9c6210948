use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of a table within a document. Stable across renames: renaming a
/// table changes its `table_id` string mapping elsewhere, but a `TableRef`
/// handed to formulas is resolved by this opaque id, not by name.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

/// Identity of a column within a table. Unique only within its owning table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColId(pub u32);

/// Row identity within a table. Row id 0 is the permanent "empty record".
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub i64);

impl RowId {
    pub const EMPTY: RowId = RowId(0);

    pub fn is_empty_record(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a dependency-graph node: a single `(table, column)` pair.
/// Every cell in that column shares this node; row-level granularity is
/// carried by the relation attached to a dependency edge, not by the node.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyNode {
    pub table: TableId,
    pub col: ColId,
}

impl DependencyNode {
    pub fn new(table: TableId, col: ColId) -> Self {
        Self { table, col }
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.col)
    }
}

/// A single cell address, `(table, column, row)`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddr {
    pub table: TableId,
    pub col: ColId,
    pub row: RowId,
}

impl CellAddr {
    pub fn new(table: TableId, col: ColId, row: RowId) -> Self {
        Self { table, col, row }
    }

    pub fn node(&self) -> DependencyNode {
        DependencyNode::new(self.table, self.col)
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.table, self.col, self.row)
    }
}
