//! Lookup index subsystem (§4.2): one `LookupIndex` per distinct tuple of
//! key columns on a table, incrementally maintained as rows are added,
//! removed, or have a key column written to.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use grist_types::{CellValue, ColId, DependencyNode, RowId};
use rustc_hash::FxHashMap;

use super::table::Table;

/// An `order_by`/`sort_by` key: a column plus ascending/descending flag.
/// Bare `sort_by` (legacy single-field form) is normalized into this on
/// the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub col: ColId,
    pub descending: bool,
}

/// §9 total order over possibly-heterogeneous cell values: `None` (Blank)
/// first, then numeric kinds, then everything else; ties broken by
/// type name, then by the formatted value.
pub fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Blank => 0,
            CellValue::Int(_) | CellValue::Numeric(_) => 1,
            _ => 2,
        }
    }
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (CellValue::Int(x), CellValue::Int(y)) => x.cmp(y),
        (CellValue::Numeric(x), CellValue::Numeric(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Int(x), CellValue::Numeric(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Numeric(x), CellValue::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (CellValue::Blank, CellValue::Blank) => Ordering::Equal,
        _ => {
            let ta = std::mem::discriminant(a);
            let tb = std::mem::discriminant(b);
            if ta == tb {
                a.to_string().cmp(&b.to_string())
            } else {
                format!("{a:?}").cmp(&format!("{b:?}"))
            }
        }
    }
}

#[derive(Debug)]
pub struct LookupIndex {
    pub key_cols: Vec<ColId>,
    /// Whether the (single) key column is list-valued (`ChoiceList`/
    /// `RefList`) and this index matches on individual elements (§4.2
    /// "contains" lookups).
    pub contains: bool,
    pub order: Vec<OrderField>,
    forward: FxHashMap<Vec<CellValue>, BTreeSet<RowId>>,
    /// The exact keys each row is currently indexed under, cached so
    /// removal cleans up `forward` by the keys that were actually
    /// inserted rather than by re-deriving keys from the row's current
    /// (possibly already-cleared) cell values.
    row_keys: FxHashMap<RowId, Vec<Vec<CellValue>>>,
    /// Formula cells subscribed to a specific key's result set, registered
    /// on query (§4.2 step 3); invalidated directly rather than through a
    /// `Relation`.
    subscribers: FxHashMap<Vec<CellValue>, Vec<(DependencyNode, RowId)>>,
}

impl LookupIndex {
    pub fn new(key_cols: Vec<ColId>, contains: bool, order: Vec<OrderField>) -> Self {
        Self {
            key_cols,
            contains,
            order,
            forward: FxHashMap::default(),
            row_keys: FxHashMap::default(),
            subscribers: FxHashMap::default(),
        }
    }

    fn key_for_row(&self, table: &Table, row: RowId) -> Vec<CellValue> {
        self.key_cols.iter().map(|c| table.get(*c, row)).collect()
    }

    fn index_keys(&self, table: &Table, row: RowId) -> Vec<Vec<CellValue>> {
        if !self.contains {
            return vec![self.key_for_row(table, row)];
        }
        let col = self.key_cols[0];
        match table.get(col, row) {
            CellValue::ChoiceList(items) => {
                items.as_slice().iter().map(|s| vec![CellValue::Text(s.clone())]).collect()
            }
            CellValue::RefList(items) => items.as_slice().iter().map(|r| vec![CellValue::Ref(*r)]).collect(),
            other => vec![vec![other]],
        }
    }

    pub fn on_row_added(&mut self, table: &Table, row: RowId) -> Vec<Vec<CellValue>> {
        let keys = self.index_keys(table, row);
        for key in &keys {
            self.forward.entry(key.clone()).or_default().insert(row);
        }
        self.row_keys.insert(row, keys.clone());
        keys
    }

    pub fn on_row_removed(&mut self, table: &Table, row: RowId) -> Vec<Vec<CellValue>> {
        let keys = self.row_keys.remove(&row).unwrap_or_else(|| self.index_keys(table, row));
        for key in &keys {
            if let Some(set) = self.forward.get_mut(key) {
                set.remove(&row);
            }
        }
        keys
    }

    /// A key column of `row` changed; returns the union of old and new
    /// index keys, both of which must be reported dirty by the caller.
    pub fn on_value_changed(&mut self, table: &Table, row: RowId) -> Vec<Vec<CellValue>> {
        let mut dirty = self.on_row_removed(table, row);
        dirty.extend(self.on_row_added(table, row));
        dirty
    }

    pub fn register_subscriber(&mut self, key: Vec<CellValue>, dependent: DependencyNode, row: RowId) {
        let list = self.subscribers.entry(key).or_default();
        if !list.contains(&(dependent, row)) {
            list.push((dependent, row));
        }
    }

    pub fn subscribers_of(&self, key: &[CellValue]) -> &[(DependencyNode, RowId)] {
        self.subscribers.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// §4.2 query: rows matching `key`, ordered by `self.order` (empty
    /// order = ascending row id).
    pub fn query(&self, table: &Table, key: &[CellValue]) -> Vec<RowId> {
        let mut rows: Vec<RowId> = self
            .forward
            .get(key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        if self.order.is_empty() {
            rows.sort();
            return rows;
        }
        rows.sort_by(|&a, &b| {
            for field in &self.order {
                let va = table.get(field.col, a);
                let vb = table.get(field.col, b);
                let ord = compare_values(&va, &vb);
                let ord = if field.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.cmp(&b)
        });
        rows
    }
}

/// §4.2: normalizes `order_by`/`sort_by` into an `OrderField` list.
/// `order_by` entries are `ColId`s, each represented as `(col, desc)`
/// already by the caller; this just applies the documented adjustments:
/// append `manualSort` as a final tiebreaker when absent, drop trailing
/// `id`-named fields.
pub fn normalize_order(
    table: &Table,
    mut fields: Vec<OrderField>,
) -> Vec<OrderField> {
    while let Some(last) = fields.last() {
        let name = table
            .columns
            .get(&last.col)
            .map(|c| c.name.as_str())
            .unwrap_or("");
        if name == "id" {
            fields.pop();
        } else {
            break;
        }
    }
    if !fields.is_empty() {
        let has_manual_sort = fields.iter().any(|f| {
            table
                .columns
                .get(&f.col)
                .map(|c| c.name == "manualSort")
                .unwrap_or(false)
        });
        if !has_manual_sort {
            if let Some(col) = table.find_col_by_name("manualSort") {
                fields.push(OrderField {
                    col,
                    descending: false,
                });
            }
        }
    }
    fields
}
