//! Formula body interpreter (§4.4 step 3, §4.6). Walks the tree produced
//! by the transformer directly rather than compiling to a host-language
//! module, per the "Dynamic formula execution" design note: closures are
//! cached by `(table, col, source)` in [`super::codegen`], and each cache
//! hit re-enters this interpreter against the current `rec`/`table`.

use grist_formula::{BinOp, Body, Expr, Stmt, UnOp};
use grist_types::{
    CellAddr, CellValue, ColId, ColumnType, DependencyNode, GristError, GristErrorKind,
    RaisedException, RowId, TableId,
};
use rustc_hash::FxHashMap;

use super::lookup::OrderField;
use super::relation::Relation;
use super::summary::ActionSummary;
use super::{Document, LookupKey};

/// Interpreter-level value. Distinct from `CellValue`: formulas manipulate
/// lists and record handles that never get stored verbatim in a cell; only
/// [`Value::Cell`] and a list of [`Value::Cell`]s coerce back into storage.
#[derive(Debug, Clone)]
pub enum Value {
    Cell(CellValue),
    List(Vec<Value>),
    /// A lazy handle over one row, carrying the relation that would invert
    /// a read through it back to the row that produced it (§3 "Record").
    Record { table: TableId, row: RowId, via: Relation },
    /// A lazy handle over a set of rows, as returned by `lookupRecords` or
    /// a `RefList` traversal (§3 "RecordSet").
    RecordSet { table: TableId, rows: Vec<RowId>, via: Relation },
    /// An unresolved reference to a table by name, e.g. the `Purchases` in
    /// `Purchases.lookupRecords(...)`.
    TableRef(TableId),
}

impl Value {
    pub fn as_cell(&self) -> CellValue {
        match self {
            Value::Cell(c) => c.clone(),
            Value::List(items) => {
                CellValue::Text(format!(
                    "[{}]",
                    items.iter().map(|v| v.as_cell().to_string()).collect::<Vec<_>>().join(", ")
                ))
            }
            Value::Record { row, .. } => CellValue::Ref(*row),
            Value::RecordSet { rows, .. } => CellValue::RefList(rows.clone().into()),
            Value::TableRef(_) => CellValue::Blank,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self.as_cell() {
            CellValue::Int(i) => Some(i as f64),
            CellValue::Numeric(n) => Some(n),
            CellValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        match self.as_cell() {
            CellValue::Bool(b) => b,
            CellValue::Int(i) => i != 0,
            CellValue::Numeric(n) => n != 0.0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Blank => false,
            CellValue::Ref(r) => !r.is_empty_record(),
            _ => true,
        }
    }
}

/// Evaluation context for a single `(table, col, row)` recomputation.
pub struct EvalCtx<'a> {
    pub doc: &'a mut Document,
    pub summary: &'a mut ActionSummary,
    pub table: TableId,
    pub row: RowId,
    pub dependent: DependencyNode,
    locals: FxHashMap<String, Value>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(
        doc: &'a mut Document,
        summary: &'a mut ActionSummary,
        table: TableId,
        row: RowId,
        dependent: DependencyNode,
    ) -> Self {
        Self {
            doc,
            summary,
            table,
            row,
            dependent,
            locals: FxHashMap::default(),
        }
    }

    fn err(&self, kind: GristErrorKind) -> GristError {
        GristError::from(kind)
    }

    /// Records that this formula's result depends on `node`, via `relation`
    /// (§4.3 `add_edge`).
    fn depend(&mut self, node: DependencyNode, relation: Relation) {
        self.doc.graph.add_edge(self.dependent, node, relation);
    }

    /// Reads `(table, col, row)`, recording the dependency. If the target
    /// is itself an unevaluated formula cell, computes it on demand first
    /// (§4.4): this is how the recalc loop's topological order actually
    /// gets discovered, and how re-entry into an already-active cell is
    /// caught as a [`GristErrorKind::CircularRef`] (§4.3, §8 scenario 5).
    fn read_column(&mut self, table: TableId, col: ColId, row: RowId, via: Relation) -> Result<Value, GristError> {
        let node = DependencyNode::new(table, col);
        self.depend(node, via);
        let is_formula = self
            .doc
            .tables
            .get(&table)
            .and_then(|t| t.columns.get(&col))
            .map(|c| c.is_formula)
            .unwrap_or(false);
        if is_formula {
            let current = self.doc.tables.get(&table).map(|t| t.get(col, row)).unwrap_or(CellValue::Blank);
            let needs_compute = matches!(current, CellValue::Pending) || self.doc.graph.has_pending_for(node, row);
            if needs_compute {
                if self.doc.graph.is_active(node, row) {
                    return Err(GristError::circular_ref(CellAddr::new(table, col, row)));
                }
                let value = super::recalc::compute_and_store(self.doc, self.summary, node, row);
                return Ok(cell_to_value(table, value));
            }
        }
        let cell = self
            .doc
            .tables
            .get(&table)
            .map(|t| t.get(col, row))
            .unwrap_or(CellValue::Blank);
        Ok(cell_to_value(table, cell))
    }

    fn resolve_table(&self, name: &str) -> Option<TableId> {
        self.doc.find_table_by_name(name)
    }
}

fn cell_to_value(owner: TableId, cell: CellValue) -> Value {
    match &cell {
        CellValue::Ref(r) => Value::Record {
            table: owner,
            row: *r,
            via: Relation::Identity,
        },
        CellValue::RefList(list) => Value::RecordSet {
            table: owner,
            rows: list.as_slice().to_vec(),
            via: Relation::Identity,
        },
        _ => Value::Cell(cell),
    }
}

/// Runs a transformed body to completion, returning its `return` value or
/// the error it raised (§4.4 step 3, §4.13).
pub fn eval_body(ctx: &mut EvalCtx, body: &Body) -> Result<Value, GristError> {
    for stmt in body {
        if let Some(v) = eval_stmt(ctx, stmt)? {
            return Ok(v);
        }
    }
    Ok(Value::Cell(CellValue::Blank))
}

fn eval_stmt(ctx: &mut EvalCtx, stmt: &Stmt) -> Result<Option<Value>, GristError> {
    match stmt {
        Stmt::Return(e, _) => Ok(Some(eval_expr(ctx, e)?)),
        Stmt::Expr(e, _) => {
            eval_expr(ctx, e)?;
            Ok(None)
        }
        Stmt::Assign { target, value, .. } => {
            let v = eval_expr(ctx, value)?;
            if let Expr::Ident(name, _) = target {
                ctx.locals.insert(name.clone(), v);
            }
            Ok(None)
        }
        Stmt::If { cond, body, orelse, .. } => {
            if eval_expr(ctx, cond)?.truthy() {
                eval_body_inner(ctx, body)
            } else {
                eval_body_inner(ctx, orelse)
            }
        }
    }
}

fn eval_body_inner(ctx: &mut EvalCtx, body: &Body) -> Result<Option<Value>, GristError> {
    for stmt in body {
        if let Some(v) = eval_stmt(ctx, stmt)? {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

fn eval_expr(ctx: &mut EvalCtx, expr: &Expr) -> Result<Value, GristError> {
    match expr {
        Expr::Int(i, _) => Ok(Value::Cell(CellValue::Int(*i))),
        Expr::Float(f, _) => Ok(Value::Cell(CellValue::Numeric(*f))),
        Expr::Str(s, _) => Ok(Value::Cell(CellValue::Text(s.clone()))),
        Expr::Bool(b, _) => Ok(Value::Cell(CellValue::Bool(*b))),
        Expr::None(_) => Ok(Value::Cell(CellValue::Blank)),
        Expr::Ident(name, _) => {
            if name == "rec" {
                return Ok(Value::Record {
                    table: ctx.table,
                    row: ctx.row,
                    via: Relation::Identity,
                });
            }
            if let Some(v) = ctx.locals.get(name) {
                return Ok(v.clone());
            }
            if let Some(t) = ctx.resolve_table(name) {
                return Ok(Value::TableRef(t));
            }
            Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("unknown name '{name}'")))
        }
        Expr::Attr(base, attr, _, _) => {
            let base_v = eval_expr(ctx, base)?;
            eval_attr(ctx, base_v, attr)
        }
        Expr::Subscript(base, idx, _) => {
            let base_v = eval_expr(ctx, base)?;
            let idx_v = eval_expr(ctx, idx)?;
            match base_v {
                Value::List(items) => {
                    let i = idx_v.as_number().unwrap_or(0.0) as i64;
                    let i = if i < 0 { items.len() as i64 + i } else { i };
                    items
                        .get(i as usize)
                        .cloned()
                        .ok_or_else(|| ctx.err(GristErrorKind::InvalidAction).with_message("index out of range"))
                }
                Value::RecordSet { table, rows, via } => {
                    let i = idx_v.as_number().unwrap_or(0.0) as i64;
                    let i = if i < 0 { rows.len() as i64 + i } else { i };
                    rows.get(i as usize)
                        .map(|r| Value::Record { table, row: *r, via })
                        .ok_or_else(|| ctx.err(GristErrorKind::InvalidAction).with_message("index out of range"))
                }
                _ => Err(ctx.err(GristErrorKind::InvalidAction).with_message("not subscriptable")),
            }
        }
        Expr::List(items, _) => {
            let mut out = Vec::with_capacity(items.len());
            for it in items {
                out.push(eval_expr(ctx, it)?);
            }
            Ok(Value::List(out))
        }
        Expr::ListComp { elt, var, iter, cond, .. } => {
            let iterable = eval_expr(ctx, iter)?;
            let items = iterable_values(iterable);
            let mut out = Vec::new();
            for item in items {
                ctx.locals.insert(var.clone(), item);
                if let Some(c) = cond {
                    if !eval_expr(ctx, c)?.truthy() {
                        continue;
                    }
                }
                out.push(eval_expr(ctx, elt)?);
            }
            ctx.locals.remove(var);
            Ok(Value::List(out))
        }
        Expr::BinOp(l, op, r, _) => eval_binop(ctx, l, op, r),
        Expr::UnOp(op, e, _) => {
            let v = eval_expr(ctx, e)?;
            match op {
                UnOp::Not => Ok(Value::Cell(CellValue::Bool(!v.truthy()))),
                UnOp::Neg => {
                    let n = v.as_number().ok_or_else(|| ctx.err(GristErrorKind::InvalidAction))?;
                    Ok(Value::Cell(CellValue::Numeric(-n)))
                }
            }
        }
        Expr::Ternary { body, cond, orelse, .. } => {
            if eval_expr(ctx, cond)?.truthy() {
                eval_expr(ctx, body)
            } else {
                eval_expr(ctx, orelse)
            }
        }
        Expr::Lambda(inner, _) => eval_expr(ctx, inner),
        Expr::Call { callee, args, kwargs, .. } => eval_call(ctx, callee, args, kwargs),
    }
}

fn iterable_values(v: Value) -> Vec<Value> {
    match v {
        Value::List(items) => items,
        Value::RecordSet { table, rows, via } => rows
            .into_iter()
            .map(|row| Value::Record { table, row, via })
            .collect(),
        other => vec![other],
    }
}

fn eval_attr(ctx: &mut EvalCtx, base: Value, attr: &str) -> Result<Value, GristError> {
    match base {
        Value::Record { table, row, via } => {
            if attr == "id" {
                return Ok(Value::Cell(CellValue::Int(row.0)));
            }
            let Some(col) = ctx.doc.table(table).and_then(|t| t.find_col_by_name(attr)) else {
                return Err(ctx
                    .err(GristErrorKind::InvalidAction)
                    .with_message(format!("no column '{attr}'")));
            };
            let value = ctx.read_column(table, col, row, via)?;
            match &value {
                Value::Record { .. } | Value::RecordSet { .. } => {
                    // Keep invalidation anchored to the first hop off `rec`
                    // (see `eval.rs` module docs / DESIGN.md): a record
                    // reached through a reference keeps that reference's
                    // relation for any further hops.
                    let sticky = if matches!(via, Relation::Identity) {
                        if let Value::Record { .. } = &value {
                            Relation::Reference(col)
                        } else {
                            Relation::ReferenceList(col)
                        }
                    } else {
                        via
                    };
                    Ok(match value {
                        Value::Record { table, row, .. } => Value::Record { table, row, via: sticky },
                        Value::RecordSet { table, rows, .. } => Value::RecordSet { table, rows, via: sticky },
                        other => other,
                    })
                }
                _ => Ok(value),
            }
        }
        Value::RecordSet { table, rows, via } => match attr {
            "all" => Ok(Value::List(rows.into_iter().map(|row| Value::Record { table, row, via }).collect())),
            _ => Err(ctx
                .err(GristErrorKind::InvalidAction)
                .with_message(format!("cannot read '{attr}' off a RecordSet of {} rows", rows.len()))),
        },
        Value::TableRef(table) => match attr {
            "all" => {
                let rows: Vec<RowId> = ctx
                    .doc
                    .table(table)
                    .map(|t| t.rows().filter(|r| !r.is_empty_record()).collect())
                    .unwrap_or_default();
                Ok(Value::RecordSet { table, rows, via: Relation::Identity })
            }
            _ => Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("unknown table attribute '{attr}'"))),
        },
        _ => Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("cannot read '.{attr}'"))),
    }
}

fn eval_binop(ctx: &mut EvalCtx, l: &Expr, op: &BinOp, r: &Expr) -> Result<Value, GristError> {
    if matches!(op, BinOp::And | BinOp::Or) {
        let lv = eval_expr(ctx, l)?;
        return match op {
            BinOp::And => {
                if !lv.truthy() {
                    Ok(lv)
                } else {
                    eval_expr(ctx, r)
                }
            }
            BinOp::Or => {
                if lv.truthy() {
                    Ok(lv)
                } else {
                    eval_expr(ctx, r)
                }
            }
            _ => unreachable!(),
        };
    }
    let lv = eval_expr(ctx, l)?;
    let rv = eval_expr(ctx, r)?;
    match op {
        BinOp::Eq => Ok(Value::Cell(CellValue::Bool(values_equal(&lv, &rv)))),
        BinOp::NotEq => Ok(Value::Cell(CellValue::Bool(!values_equal(&lv, &rv)))),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            if let (CellValue::Text(a), CellValue::Text(b)) = (lv.as_cell(), rv.as_cell()) {
                if matches!(op, BinOp::Add) {
                    return Ok(Value::Cell(CellValue::Text(a + &b)));
                }
            }
            let a = lv.as_number().ok_or_else(|| ctx.err(GristErrorKind::InvalidAction).with_message("not a number"))?;
            let b = rv.as_number().ok_or_else(|| ctx.err(GristErrorKind::InvalidAction).with_message("not a number"))?;
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(ctx.err(GristErrorKind::InvalidAction).with_message("division by zero"));
                    }
                    a / b
                }
                BinOp::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(Value::Cell(CellValue::Numeric(result)))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = super::lookup::compare_values(&lv.as_cell(), &rv.as_cell());
            let b = match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                BinOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Cell(CellValue::Bool(b)))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.as_cell().encoding_equal(&b.as_cell())
}

fn eval_call(
    ctx: &mut EvalCtx,
    callee: &Expr,
    args: &[Expr],
    kwargs: &[(String, Expr)],
) -> Result<Value, GristError> {
    if let Expr::Attr(base, method, _, _) = callee {
        if let Expr::Attr(inner, finder, _, _) = base.as_ref() {
            if finder == "find" {
                return eval_find_call(ctx, inner, method, args);
            }
        }
        let base_v = eval_expr(ctx, base)?;
        if let Value::TableRef(table) = base_v {
            return eval_lookup_call(ctx, table, method, kwargs);
        }
    }
    let Expr::Ident(name, _) = callee else {
        return Err(ctx.err(GristErrorKind::InvalidAction).with_message("not callable"));
    };
    match name.as_str() {
        "IF" => {
            let cond = eval_expr(ctx, &args[0])?;
            if cond.truthy() {
                eval_expr(ctx, &args[1])
            } else {
                eval_expr(ctx, &args[2])
            }
        }
        "ISERR" | "ISERROR" => Ok(Value::Cell(CellValue::Bool(eval_expr(ctx, &args[0]).is_err()))),
        "IFERROR" => match eval_expr(ctx, &args[0]) {
            Ok(v) => Ok(v),
            Err(_) => eval_expr(ctx, &args[1]),
        },
        "PEEK" => eval_expr(ctx, &args[0]).or_else(|_| Ok(Value::Cell(CellValue::Blank))),
        "SUM" => {
            let items = flatten_args(ctx, args)?;
            let total: f64 = items.iter().filter_map(|v| v.as_number()).sum();
            Ok(Value::Cell(CellValue::Numeric(total)))
        }
        "LEN" => {
            let v = eval_expr(ctx, &args[0])?;
            let n = match v {
                Value::List(items) => items.len(),
                Value::RecordSet { rows, .. } => rows.len(),
                Value::Cell(CellValue::Text(s)) => s.chars().count(),
                _ => 0,
            };
            Ok(Value::Cell(CellValue::Int(n as i64)))
        }
        "ABS" => {
            let n = eval_expr(ctx, &args[0])?.as_number().unwrap_or(0.0);
            Ok(Value::Cell(CellValue::Numeric(n.abs())))
        }
        "ROUND" => {
            let n = eval_expr(ctx, &args[0])?.as_number().unwrap_or(0.0);
            let digits = match args.get(1) {
                Some(e) => eval_expr(ctx, e)?.as_number().unwrap_or(0.0) as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            Ok(Value::Cell(CellValue::Numeric((n * factor).round() / factor)))
        }
        "MAX" | "MIN" => {
            let items = flatten_args(ctx, args)?;
            let nums: Vec<f64> = items.iter().filter_map(|v| v.as_number()).collect();
            let result = if name == "MAX" {
                nums.into_iter().fold(f64::NEG_INFINITY, f64::max)
            } else {
                nums.into_iter().fold(f64::INFINITY, f64::min)
            };
            Ok(Value::Cell(CellValue::Numeric(result)))
        }
        "ANY" => {
            let items = flatten_args(ctx, args)?;
            Ok(Value::Cell(CellValue::Bool(items.iter().any(|v| v.truthy()))))
        }
        "ALL" => {
            let items = flatten_args(ctx, args)?;
            Ok(Value::Cell(CellValue::Bool(items.iter().all(|v| v.truthy()))))
        }
        "STR" => {
            let v = eval_expr(ctx, &args[0])?;
            Ok(Value::Cell(CellValue::Text(v.as_cell().to_string())))
        }
        other => Err(ctx
            .err(GristErrorKind::InvalidAction)
            .with_message(format!("unknown function '{other}'"))),
    }
}

fn flatten_args(ctx: &mut EvalCtx, args: &[Expr]) -> Result<Vec<Value>, GristError> {
    let mut out = Vec::new();
    for a in args {
        let v = eval_expr(ctx, a)?;
        match v {
            Value::List(items) => out.extend(items),
            Value::RecordSet { table, rows, via } => {
                out.extend(rows.into_iter().map(|row| Value::Record { table, row, via }))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// `Table.lookupRecords(Col=value, ..., sort_by='-Date')` / `lookupOne`
/// (§4.2). Resolves (or lazily creates) the keyed lookup index, queries
/// it, and records the caller's dependency on that specific key.
fn eval_lookup_call(
    ctx: &mut EvalCtx,
    table: TableId,
    method: &str,
    kwargs: &[(String, Expr)],
) -> Result<Value, GristError> {
    let order = resolve_order(ctx, table, kwargs);
    let mut key_cols = Vec::new();
    let mut key_values = Vec::new();
    for (name, value_expr) in kwargs {
        if name == "sort_by" || name == "order_by" {
            continue;
        }
        let Some(col) = ctx.doc.table(table).and_then(|t| t.find_col_by_name(name)) else {
            return Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("no column '{name}'")));
        };
        key_cols.push(col);
        key_values.push(eval_expr(ctx, value_expr)?.as_cell());
    }
    // §4.2 "contains" lookups: a single list-valued key column (ChoiceList
    // or RefList) matches a query value against its individual elements
    // rather than the whole list.
    let contains = key_cols.len() == 1
        && ctx
            .doc
            .table(table)
            .and_then(|t| t.columns.get(&key_cols[0]))
            .map(|c| matches!(c.col_type, ColumnType::ChoiceList | ColumnType::RefList(_)))
            .unwrap_or(false);
    let order_key: Vec<(ColId, bool)> = order.iter().map(|f| (f.col, f.descending)).collect();
    let lookup_key: LookupKey = (table, key_cols.clone(), contains, order_key);
    if !ctx.doc.lookups.contains_key(&lookup_key) {
        let mut idx = super::LookupIndex::new(key_cols.clone(), contains, order.clone());
        if let Some(t) = ctx.doc.tables.get(&table) {
            for row in t.rows() {
                idx.on_row_added(t, row);
            }
        }
        ctx.doc.lookups.insert(lookup_key.clone(), idx);
    }
    let rows = {
        let idx = ctx.doc.lookups.get(&lookup_key).unwrap();
        let t = ctx.doc.tables.get(&table).unwrap();
        idx.query(t, &key_values)
    };
    if let Some(idx) = ctx.doc.lookups.get_mut(&lookup_key) {
        idx.register_subscriber(key_values, ctx.dependent, ctx.row);
    }
    // A formula reading a lookup result depends on the lookup's keyed
    // subset of the target table rather than the whole table; modeled here
    // as an identity dependency on the target table's own "new-columns"
    // sentinel node (col 0), refined by the index's subscriber registry.
    ctx.depend(DependencyNode::new(table, ColId(0)), Relation::Identity);
    match method {
        "lookupOne" => Ok(match rows.first() {
            Some(r) => Value::Record { table, row: *r, via: Relation::Identity },
            None => Value::Record { table, row: RowId::EMPTY, via: Relation::Identity },
        }),
        "lookupRecords" => Ok(Value::RecordSet { table, rows, via: Relation::Identity }),
        other => Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("unknown lookup method '{other}'"))),
    }
}

/// Parses and normalizes the `sort_by`/`order_by` kwarg of a lookup call,
/// shared between `eval_lookup_call` and `eval_find_call` (the latter
/// needs the same order to pick the `find` binary search's primary key).
fn resolve_order(ctx: &EvalCtx, table: TableId, kwargs: &[(String, Expr)]) -> Vec<OrderField> {
    let mut order = Vec::new();
    for (name, value_expr) in kwargs {
        if name == "sort_by" || name == "order_by" {
            if let Expr::Str(spec, _) = value_expr {
                order = parse_order_spec(ctx, table, spec);
            }
        }
    }
    if let Some(t) = ctx.doc.table(table) {
        order = super::lookup::normalize_order(t, order);
    }
    order
}

/// `<lookup>.find.lt/le/gt/ge/eq/next/previous(value)` (§4.2): binary
/// search over an ordered `lookupRecords`/`lookupOne` result for the row
/// whose primary sort key relates to `value` as requested. `next`/
/// `previous` are the same search as `gt`/`lt`, named for walking forward
/// or backward along the ordered result from a reference value. Returns
/// the empty record when nothing matches.
fn eval_find_call(ctx: &mut EvalCtx, recordset_expr: &Expr, method: &str, args: &[Expr]) -> Result<Value, GristError> {
    let order = match recordset_expr {
        Expr::Call { callee, kwargs, .. } => match callee.as_ref() {
            Expr::Attr(table_expr, lookup_method, _, _) if lookup_method == "lookupRecords" || lookup_method == "lookupOne" => {
                match eval_expr(ctx, table_expr)? {
                    Value::TableRef(table) => resolve_order(ctx, table, kwargs),
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    let Some(sort) = order.first().cloned() else {
        return Err(ctx.err(GristErrorKind::InvalidAction).with_message("find requires a sort_by/order_by lookup"));
    };
    let base_v = eval_expr(ctx, recordset_expr)?;
    let (table, rows, via) = match base_v {
        Value::RecordSet { table, rows, via } => (table, rows, via),
        Value::Record { table, row, via } if !row.is_empty_record() => (table, vec![row], via),
        _ => return Err(ctx.err(GristErrorKind::InvalidAction).with_message("find requires a lookup result")),
    };
    let target = eval_expr(ctx, &args[0])?.as_cell();

    let t = ctx.doc.tables.get(&table).ok_or_else(|| ctx.err(GristErrorKind::InvalidAction).with_message("no such table"))?;
    let mut keyed: Vec<(RowId, CellValue)> = rows.iter().map(|&r| (r, t.get(sort.col, r))).collect();
    if sort.descending {
        keyed.reverse();
    }
    let idx_lt = keyed.partition_point(|(_, v)| super::lookup::compare_values(v, &target).is_lt());
    let idx_le = keyed.partition_point(|(_, v)| super::lookup::compare_values(v, &target).is_le());
    let found = match method {
        "lt" | "previous" => idx_lt.checked_sub(1).map(|i| keyed[i].0),
        "le" => idx_le.checked_sub(1).map(|i| keyed[i].0),
        "gt" | "next" => keyed.get(idx_le).map(|(r, _)| *r),
        "ge" => keyed.get(idx_lt).map(|(r, _)| *r),
        "eq" => (idx_lt < idx_le).then(|| keyed[idx_lt].0),
        other => return Err(ctx.err(GristErrorKind::InvalidAction).with_message(format!("unknown find method '{other}'"))),
    };

    ctx.depend(DependencyNode::new(table, sort.col), via);
    Ok(match found {
        Some(row) => Value::Record { table, row, via },
        None => Value::Record { table, row: RowId::EMPTY, via },
    })
}

fn parse_order_spec(ctx: &EvalCtx, table: TableId, spec: &str) -> Vec<OrderField> {
    let Some(t) = ctx.doc.table(table) else {
        return Vec::new();
    };
    spec.split(',')
        .filter_map(|raw| {
            let raw = raw.trim();
            let (descending, name) = match raw.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            t.find_col_by_name(name).map(|col| OrderField { col, descending })
        })
        .collect()
}

/// Surfaces a raised error as the stored cell value (§4.13), rather than
/// propagating it to the caller of the recalculation loop.
pub fn error_to_cell(err: GristError) -> CellValue {
    let mut exc = RaisedException::new(exception_name(&err.kind));
    if let Some(msg) = err.message {
        exc = exc.with_message(msg);
    }
    CellValue::Raised(Box::new(exc))
}

fn exception_name(kind: &GristErrorKind) -> &'static str {
    match kind {
        GristErrorKind::CircularRef { .. } => "CircularRefError",
        GristErrorKind::InvalidTypedValue { .. } => "InvalidTypedValue",
        GristErrorKind::SyntaxError { .. } => "SyntaxError",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::column::Column;
    use crate::engine::table::Table;
    use grist_types::ColumnType;

    fn setup() -> (Document, DependencyNode) {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
        t.add_column(ColId(2), Column::formula("Double", ColumnType::Numeric, "$Amount * 2"));
        t.insert_row(RowId(1));
        t.set(ColId(1), RowId(1), CellValue::Numeric(21.0));
        doc.tables.insert(TableId(1), t);
        (doc, DependencyNode::new(TableId(1), ColId(2)))
    }

    #[test]
    fn reads_own_column_and_records_identity_dependency() {
        let (mut doc, dep) = setup();
        let body = grist_formula::transform("rec.Amount * 2").unwrap().body;
        let mut summary = ActionSummary::default();
        let mut ctx = EvalCtx::new(&mut doc, &mut summary, TableId(1), RowId(1), dep);
        let result = eval_body(&mut ctx, &body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Numeric(42.0));
        drop(ctx);
        assert!(doc.graph.has_pending() == false);
    }

    #[test]
    fn if_only_evaluates_selected_branch() {
        let (mut doc, dep) = setup();
        let t = grist_formula::transform("IF(rec.Amount > 0, 1, 1/0)").unwrap();
        let mut summary = ActionSummary::default();
        let mut ctx = EvalCtx::new(&mut doc, &mut summary, TableId(1), RowId(1), dep);
        let result = eval_body(&mut ctx, &t.body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Int(1));
    }

    #[test]
    fn division_by_zero_is_catchable_with_iferror() {
        let (mut doc, dep) = setup();
        let t = grist_formula::transform("IFERROR(1/0, -1)").unwrap();
        let mut summary = ActionSummary::default();
        let mut ctx = EvalCtx::new(&mut doc, &mut summary, TableId(1), RowId(1), dep);
        let result = eval_body(&mut ctx, &t.body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Numeric(-1.0));
    }

    #[test]
    fn reading_an_active_formula_cell_raises_circular_ref() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Loop");
        t.add_column(ColId(1), Column::formula("A", ColumnType::Any, "rec.B"));
        t.add_column(ColId(2), Column::formula("B", ColumnType::Any, "rec.A"));
        t.insert_row(RowId(1));
        doc.tables.insert(TableId(1), t);
        let node_a = DependencyNode::new(TableId(1), ColId(1));
        doc.graph.schedule(node_a, [RowId(1)]);
        let mut summary = ActionSummary::default();
        super::super::recalc::compute_and_store(&mut doc, &mut summary, node_a, RowId(1));
        let t = doc.tables.get(&TableId(1)).unwrap();
        assert!(matches!(t.get(ColId(1), RowId(1)), CellValue::Raised(_)));
        assert!(matches!(t.get(ColId(2), RowId(1)), CellValue::Raised(_)));
    }

    #[test]
    fn find_lt_binary_searches_an_ordered_lookup_result() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Purchases");
        t.add_column(ColId(1), Column::new("Date", ColumnType::Int));
        for (row, date) in [1, 3, 5, 7, 9].into_iter().enumerate() {
            let row = RowId(row as i64 + 1);
            t.insert_row(row);
            t.set(ColId(1), row, CellValue::Int(date));
        }
        doc.tables.insert(TableId(1), t);
        let dep = DependencyNode::new(TableId(1), ColId(1));
        let mut summary = ActionSummary::default();
        let mut ctx = EvalCtx::new(&mut doc, &mut summary, TableId(1), RowId(1), dep);
        let body = grist_formula::transform("Purchases.lookupRecords(sort_by='Date').find.lt(6)").unwrap().body;
        let result = eval_body(&mut ctx, &body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Ref(RowId(3)));

        let body = grist_formula::transform("Purchases.lookupRecords(sort_by='Date').find.gt(6)").unwrap().body;
        let result = eval_body(&mut ctx, &body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Ref(RowId(4)));

        let body = grist_formula::transform("Purchases.lookupRecords(sort_by='Date').find.eq(100)").unwrap().body;
        let result = eval_body(&mut ctx, &body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Ref(RowId::EMPTY));
    }

    #[test]
    fn lookup_over_a_choicelist_column_matches_individual_elements() {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Tasks");
        t.add_column(ColId(1), Column::new("Tags", ColumnType::ChoiceList));
        t.insert_row(RowId(1));
        t.set(ColId(1), RowId(1), CellValue::ChoiceList(vec!["urgent".to_string(), "soon".to_string()].into()));
        t.insert_row(RowId(2));
        t.set(ColId(1), RowId(2), CellValue::ChoiceList(vec!["later".to_string()].into()));
        doc.tables.insert(TableId(1), t);
        let dep = DependencyNode::new(TableId(1), ColId(1));
        let mut summary = ActionSummary::default();
        let mut ctx = EvalCtx::new(&mut doc, &mut summary, TableId(1), RowId(1), dep);
        let body = grist_formula::transform("LEN(Tasks.lookupRecords(Tags=\"urgent\"))").unwrap().body;
        let result = eval_body(&mut ctx, &body).unwrap();
        assert_eq!(result.as_cell(), CellValue::Int(1));
    }
}
