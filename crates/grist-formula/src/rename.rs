//! Column/table rename propagation (§4.9). Renaming a column does not
//! re-run the formula transform; it patches the *original* source text of
//! every formula that mentions the old name, preserving everything else
//! byte-for-byte (§8 rename-soundness: applying the rename then the
//! inverse rename must reproduce the original text exactly).
//!
//! A reference is matched structurally: `rec.<path>` / `$<name>` chains,
//! and the bound variable of a list comprehension whose iterable is such
//! a chain (`[o.total for o in rec.orders]`). `lookupRecords`/`sort_by`
//! style string-encoded column names are patched separately since they
//! never reach the AST as identifiers.

use crate::ast::{Expr, Span, Stmt};
use crate::parser::{self, ParseError};

/// A single textual substitution against the *original* formula source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct RenameError(pub ParseError);

/// Kwargs whose string-literal value encodes one or more column names,
/// each optionally prefixed with `-` for descending order.
const SORT_KEY_KWARGS: &[&str] = &["sort_by", "order_by", "group_by"];

/// Rewrites every reference to the attribute chain `path` (e.g. `["total"]`
/// for a same-table column, `["customer", "name"]` for a column reached
/// through a one-hop reference) to end in `new_name` instead, returning the
/// patched source. `source` is unchanged if there was nothing to rename.
pub fn rename_in_source(source: &str, path: &[&str], new_name: &str) -> Result<String, RenameError> {
    assert!(!path.is_empty(), "rename path must not be empty");
    let body = parser::parse_body(source).map_err(RenameError)?;
    let mut patches = Vec::new();
    for stmt in &body {
        collect_stmt(stmt, path, new_name, &mut patches);
    }
    collect_sort_key_strings(source, path, new_name, &mut patches);
    Ok(apply_patches(source, patches))
}

/// Rewrites every bare reference to the table identifier `old_name` (e.g.
/// `Orders.lookupRecords(...)`, `Orders.all`) to `new_name`, leaving `rec.`
/// chains and `$col` sugar untouched since those never name a table.
pub fn rename_table_ref(source: &str, old_name: &str, new_name: &str) -> Result<String, RenameError> {
    let body = parser::parse_body(source).map_err(RenameError)?;
    let mut patches = Vec::new();
    for stmt in &body {
        collect_table_idents(stmt, old_name, new_name, &mut patches);
    }
    Ok(apply_patches(source, patches))
}

fn collect_table_idents(stmt: &Stmt, old_name: &str, new_name: &str, out: &mut Vec<Patch>) {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            collect_table_idents_expr(target, old_name, new_name, out);
            collect_table_idents_expr(value, old_name, new_name, out);
        }
        Stmt::Return(e, _) | Stmt::Expr(e, _) => collect_table_idents_expr(e, old_name, new_name, out),
        Stmt::If {
            cond, body, orelse, ..
        } => {
            collect_table_idents_expr(cond, old_name, new_name, out);
            for s in body.iter().chain(orelse.iter()) {
                collect_table_idents(s, old_name, new_name, out);
            }
        }
    }
}

fn collect_table_idents_expr(expr: &Expr, old_name: &str, new_name: &str, out: &mut Vec<Patch>) {
    if let Expr::Ident(name, span) = expr {
        if name == old_name && name != "rec" {
            out.push(Patch {
                start: span.start,
                end: span.end,
                replacement: new_name.to_string(),
            });
        }
        return;
    }
    match expr {
        Expr::Attr(base, ..) => collect_table_idents_expr(base, old_name, new_name, out),
        Expr::Call {
            callee,
            args,
            kwargs,
            ..
        } => {
            collect_table_idents_expr(callee, old_name, new_name, out);
            for a in args {
                collect_table_idents_expr(a, old_name, new_name, out);
            }
            for (_, v) in kwargs {
                collect_table_idents_expr(v, old_name, new_name, out);
            }
        }
        Expr::Subscript(base, idx, _) => {
            collect_table_idents_expr(base, old_name, new_name, out);
            collect_table_idents_expr(idx, old_name, new_name, out);
        }
        Expr::List(items, _) => {
            for it in items {
                collect_table_idents_expr(it, old_name, new_name, out);
            }
        }
        Expr::ListComp { elt, iter, cond, .. } => {
            collect_table_idents_expr(elt, old_name, new_name, out);
            collect_table_idents_expr(iter, old_name, new_name, out);
            if let Some(c) = cond {
                collect_table_idents_expr(c, old_name, new_name, out);
            }
        }
        Expr::BinOp(l, _, r, _) => {
            collect_table_idents_expr(l, old_name, new_name, out);
            collect_table_idents_expr(r, old_name, new_name, out);
        }
        Expr::UnOp(_, e, _) => collect_table_idents_expr(e, old_name, new_name, out),
        Expr::Ternary {
            body, cond, orelse, ..
        } => {
            collect_table_idents_expr(body, old_name, new_name, out);
            collect_table_idents_expr(cond, old_name, new_name, out);
            collect_table_idents_expr(orelse, old_name, new_name, out);
        }
        Expr::Lambda(e, _) => collect_table_idents_expr(e, old_name, new_name, out),
        _ => {}
    }
}

fn apply_patches(source: &str, mut patches: Vec<Patch>) -> String {
    patches.sort_by(|a, b| b.start.cmp(&a.start));
    patches.dedup_by(|a, b| a.start == b.start && a.end == b.end);
    let mut out = source.to_string();
    for p in patches {
        out.replace_range(p.start..p.end, &p.replacement);
    }
    out
}

fn collect_stmt(stmt: &Stmt, path: &[&str], new_name: &str, out: &mut Vec<Patch>) {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            collect_expr(target, path, new_name, out);
            collect_expr(value, path, new_name, out);
        }
        Stmt::Return(e, _) | Stmt::Expr(e, _) => collect_expr(e, path, new_name, out),
        Stmt::If {
            cond, body, orelse, ..
        } => {
            collect_expr(cond, path, new_name, out);
            for s in body.iter().chain(orelse.iter()) {
                collect_stmt(s, path, new_name, out);
            }
        }
    }
}

fn collect_expr(expr: &Expr, path: &[&str], new_name: &str, out: &mut Vec<Patch>) {
    // A reference matching the full chain patches just the leaf name span.
    if let Some(leaf_span) = match_rec_chain(expr, path) {
        out.push(Patch {
            start: leaf_span.start,
            end: leaf_span.end,
            replacement: new_name.to_string(),
        });
    }

    match expr {
        Expr::Attr(base, _, _, _) => collect_expr(base, path, new_name, out),
        Expr::Call {
            callee,
            args,
            kwargs,
            ..
        } => {
            collect_expr(callee, path, new_name, out);
            for a in args {
                collect_expr(a, path, new_name, out);
            }
            for (_, v) in kwargs {
                collect_expr(v, path, new_name, out);
            }
        }
        Expr::Subscript(base, idx, _) => {
            collect_expr(base, path, new_name, out);
            collect_expr(idx, path, new_name, out);
        }
        Expr::List(items, _) => {
            for it in items {
                collect_expr(it, path, new_name, out);
            }
        }
        Expr::ListComp {
            elt, var, iter, cond, ..
        } => {
            collect_expr(iter, path, new_name, out);
            if let Some(c) = cond {
                collect_expr(c, path, new_name, out);
            }
            // `[o.<leaf> for o in rec.<path[..-1]>]`: the comprehension's
            // bound variable stands in for `rec.<path[..-1]>`, so a bare
            // `var.<leaf>` access inside `elt`/`cond` is also a match.
            if path.len() >= 2 && match_rec_chain(iter, &path[..path.len() - 1]).is_some() {
                if let Some(leaf_span) = match_var_leaf(elt, var, path[path.len() - 1]) {
                    out.push(Patch {
                        start: leaf_span.start,
                        end: leaf_span.end,
                        replacement: new_name.to_string(),
                    });
                }
            }
            collect_expr(elt, path, new_name, out);
        }
        Expr::BinOp(l, _, r, _) => {
            collect_expr(l, path, new_name, out);
            collect_expr(r, path, new_name, out);
        }
        Expr::UnOp(_, e, _) => collect_expr(e, path, new_name, out),
        Expr::Ternary {
            body, cond, orelse, ..
        } => {
            collect_expr(body, path, new_name, out);
            collect_expr(cond, path, new_name, out);
            collect_expr(orelse, path, new_name, out);
        }
        Expr::Lambda(e, _) => collect_expr(e, path, new_name, out),
        Expr::Int(..)
        | Expr::Float(..)
        | Expr::Str(..)
        | Expr::Bool(..)
        | Expr::None(_)
        | Expr::Ident(..) => {}
    }
}

/// Does `expr` spell out exactly `rec.path[0].path[1]. ... .path[n-1]`?
/// Returns the name-span of the final segment (the one to patch) if so.
fn match_rec_chain(expr: &Expr, path: &[&str]) -> Option<Span> {
    let (base_segments, leaf_span) = unroll_attr_chain(expr)?;
    if base_segments.len() != path.len() {
        return None;
    }
    if base_segments
        .iter()
        .zip(path.iter())
        .all(|(got, want)| got == want)
    {
        Some(leaf_span)
    } else {
        None
    }
}

/// `var.<leaf>` where `var` is the comprehension's bound name.
fn match_var_leaf(expr: &Expr, var: &str, leaf: &str) -> Option<Span> {
    if let Expr::Attr(base, name, _, name_span) = expr {
        if name == leaf {
            if let Expr::Ident(id, _) = &**base {
                if id == var {
                    return Some(*name_span);
                }
            }
        }
    }
    None
}

/// Unrolls a `rec.a.b.c` attribute chain into (`["a","b","c"]`, span-of-`c`).
/// Returns `None` if the chain does not bottom out at `Ident("rec")`.
fn unroll_attr_chain(expr: &Expr) -> Option<(Vec<String>, Span)> {
    let Expr::Attr(base, name, _, name_span) = expr else {
        return None;
    };
    let mut segments = Vec::new();
    let mut cur = &**base;
    loop {
        match cur {
            Expr::Ident(id, _) if id == "rec" => break,
            Expr::Attr(inner_base, inner_name, _, _) => {
                segments.push(inner_name.clone());
                cur = inner_base;
            }
            _ => return None,
        }
    }
    segments.reverse();
    segments.push(name.clone());
    Some((segments, *name_span))
}

/// `lookupRecords(order_by='-rating')`, `lookupOne(sort_by='name,-age')`:
/// the column list lives inside a string literal, comma-separated, each
/// token optionally `-`-prefixed. Only rewrites a single-segment `path`;
/// multi-hop chains are not spelled this way in sort keys.
fn collect_sort_key_strings(source: &str, path: &[&str], new_name: &str, out: &mut Vec<Patch>) {
    if path.len() != 1 {
        return;
    }
    let old_name = path[0];
    let Ok(body) = parser::parse_body(source) else {
        return;
    };
    for stmt in &body {
        walk_stmt_for_kwargs(source, stmt, old_name, new_name, out);
    }
}

fn walk_stmt_for_kwargs(source: &str, stmt: &Stmt, old_name: &str, new_name: &str, out: &mut Vec<Patch>) {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            walk_expr_for_kwargs(source, target, old_name, new_name, out);
            walk_expr_for_kwargs(source, value, old_name, new_name, out);
        }
        Stmt::Return(e, _) | Stmt::Expr(e, _) => walk_expr_for_kwargs(source, e, old_name, new_name, out),
        Stmt::If {
            cond, body, orelse, ..
        } => {
            walk_expr_for_kwargs(source, cond, old_name, new_name, out);
            for s in body.iter().chain(orelse.iter()) {
                walk_stmt_for_kwargs(source, s, old_name, new_name, out);
            }
        }
    }
}

fn walk_expr_for_kwargs(source: &str, expr: &Expr, old_name: &str, new_name: &str, out: &mut Vec<Patch>) {
    if let Expr::Call { callee, args, kwargs, .. } = expr {
        walk_expr_for_kwargs(source, callee, old_name, new_name, out);
        for a in args {
            walk_expr_for_kwargs(source, a, old_name, new_name, out);
        }
        for (key, val) in kwargs {
            if SORT_KEY_KWARGS.contains(&key.as_str()) {
                if let Expr::Str(_, span) = val {
                    let raw = &source[span.start..span.end];
                    if let Some(rewritten) = rewrite_sort_key_list(raw, old_name, new_name) {
                        out.push(Patch {
                            start: span.start,
                            end: span.end,
                            replacement: rewritten,
                        });
                    }
                }
            }
            walk_expr_for_kwargs(source, val, old_name, new_name, out);
        }
        return;
    }
    for child in children(expr) {
        walk_expr_for_kwargs(source, child, old_name, new_name, out);
    }
}

fn children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Attr(base, ..) => vec![base],
        Expr::Subscript(base, idx, _) => vec![base, idx],
        Expr::List(items, _) => items.iter().collect(),
        Expr::ListComp { elt, iter, cond, .. } => {
            let mut v = vec![&**elt, &**iter];
            if let Some(c) = cond {
                v.push(c);
            }
            v
        }
        Expr::BinOp(l, _, r, _) => vec![l, r],
        Expr::UnOp(_, e, _) => vec![e],
        Expr::Ternary { body, cond, orelse, .. } => vec![body, cond, orelse],
        Expr::Lambda(e, _) => vec![e],
        _ => vec![],
    }
}

/// `text` is the raw source slice for the literal, quote characters
/// included. Returns `None` if `old_name` does not occur as a whole
/// comma-separated token.
fn rewrite_sort_key_list(text: &str, old_name: &str, new_name: &str) -> Option<String> {
    if text.len() < 2 {
        return None;
    }
    let quote = text.as_bytes()[0] as char;
    let inner = &text[1..text.len() - 1];
    let mut changed = false;
    let tokens: Vec<String> = inner
        .split(',')
        .map(|tok| {
            let trimmed = tok.trim();
            let (sign, name) = trimmed
                .strip_prefix('-')
                .map(|n| ("-", n))
                .unwrap_or(("", trimmed));
            if name == old_name {
                changed = true;
                format!("{sign}{new_name}")
            } else {
                tok.to_string()
            }
        })
        .collect();
    if !changed {
        return None;
    }
    Some(format!("{quote}{}{quote}", tokens.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_dollar_sugar_reference() {
        let out = rename_in_source("$amount * 2", &["amount"], "total").unwrap();
        assert_eq!(out, "$total * 2");
    }

    #[test]
    fn renames_rec_attr_reference() {
        let out = rename_in_source("rec.amount + 1", &["amount"], "total").unwrap();
        assert_eq!(out, "rec.total + 1");
    }

    #[test]
    fn renames_two_hop_reference_chain() {
        let out = rename_in_source("$customer.name", &["customer", "name"], "full_name").unwrap();
        assert_eq!(out, "$customer.full_name");
    }

    #[test]
    fn table_ref_rename_rewrites_bare_table_calls() {
        let out = rename_table_ref("Orders.lookupRecords(customer=$id)", "Orders", "Purchases").unwrap();
        assert_eq!(out, "Purchases.lookupRecords(customer=$id)");
    }

    #[test]
    fn table_ref_rename_leaves_rec_chains_untouched() {
        let out = rename_table_ref("rec.Orders + Orders.all", "Orders", "Purchases").unwrap();
        assert_eq!(out, "rec.Orders + Purchases.all");
    }

    #[test]
    fn renames_comprehension_bound_attr() {
        let out = rename_in_source(
            "[o.total for o in $orders]",
            &["orders", "total"],
            "amount",
        )
        .unwrap();
        assert_eq!(out, "[o.amount for o in $orders]");
    }

    #[test]
    fn renames_order_by_kwarg_string() {
        let out = rename_in_source(
            "$Orders.lookupRecords(order_by='-rating,name')",
            &["rating"],
            "stars",
        )
        .unwrap();
        assert_eq!(out, "$Orders.lookupRecords(order_by='-stars,name')");
    }

    #[test]
    fn leaves_unrelated_source_untouched() {
        let out = rename_in_source("$other + 1", &["amount"], "total").unwrap();
        assert_eq!(out, "$other + 1");
    }
}
