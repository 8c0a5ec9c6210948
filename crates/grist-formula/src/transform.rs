//! Formula body transformation (§4.5): normalizes the body, treats `$col`
//! as sugar for `rec.col`, lazily wraps the branches of a fixed set of
//! functions, turns a trailing expression into a `return`, and rejects
//! assignment to the reserved `rec` variable.

use crate::ast::{Body, Expr, Stmt};
use crate::parser::{self, ParseError};
use grist_types::{GristError, GristErrorKind};

/// Functions whose unevaluated-branch arguments must not be evaluated
/// eagerly (§4.5 step 3). The wrap happens by replacing the argument
/// expression with `Expr::Lambda(expr)`; the interpreter only forces a
/// lambda when that branch is actually selected.
const LAZY_AWARE_FUNCS: &[(&str, &[usize])] = &[
    ("IF", &[1, 2]),
    ("ISERR", &[0]),
    ("ISERROR", &[0]),
    ("IFERROR", &[0]),
    ("PEEK", &[0]),
];

#[derive(Debug, Clone)]
pub struct TransformedFormula {
    pub body: Body,
    /// `true` if the original text was empty (body became `return <default>`).
    pub was_empty: bool,
}

/// Result of transforming a formula that turned out to be invalid:
/// carries the error with a position already mapped to the user's text.
#[derive(Debug, Clone)]
pub struct TransformError(pub GristError);

/// Runs the full §4.5 pipeline over raw formula source. `source` is
/// exactly the text the user typed (already `$`-sugared); there is no
/// separate de-sugaring pre-pass because the parser treats `$name` as a
/// first-class token and desugars it into `rec.name` while parsing,
/// keeping original spans on the produced nodes so error locations never
/// need a second translation.
pub fn transform(source: &str) -> Result<TransformedFormula, TransformError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Ok(TransformedFormula {
            body: vec![Stmt::Return(
                Expr::None(crate::ast::Span::new(0, 0)),
                crate::ast::Span::new(0, 0),
            )],
            was_empty: true,
        });
    }

    let mut body = parser::parse_body(source).map_err(map_parse_error)?;

    wrap_lazy_args_body(&mut body);
    ensure_trailing_return(&mut body)?;
    reject_reserved_assignment(&body)?;

    Ok(TransformedFormula {
        body,
        was_empty: false,
    })
}

fn map_parse_error(e: ParseError) -> TransformError {
    TransformError(GristError::syntax(e.line, e.col).with_message(e.message))
}

/// §4.5 step 3: wrap the lazy-evaluated argument slots of `IF`/`ISERR`/
/// `ISERROR`/`IFERROR`/`PEEK` calls, recursively.
fn wrap_lazy_args_body(body: &mut Body) {
    for stmt in body.iter_mut() {
        wrap_lazy_args_stmt(stmt);
    }
}

fn wrap_lazy_args_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            wrap_lazy_args_expr(target);
            wrap_lazy_args_expr(value);
        }
        Stmt::Return(e, _) | Stmt::Expr(e, _) => wrap_lazy_args_expr(e),
        Stmt::If {
            cond, body, orelse, ..
        } => {
            wrap_lazy_args_expr(cond);
            wrap_lazy_args_body(body);
            wrap_lazy_args_body(orelse);
        }
    }
}

fn wrap_lazy_args_expr(expr: &mut Expr) {
    match expr {
        Expr::Call { callee, args, .. } => {
            for a in args.iter_mut() {
                wrap_lazy_args_expr(a);
            }
            if let Expr::Ident(name, _) = &**callee {
                if let Some((_, slots)) = LAZY_AWARE_FUNCS.iter().find(|(n, _)| n == name) {
                    for &i in *slots {
                        if let Some(arg) = args.get_mut(i) {
                            let span = arg.span();
                            let taken = std::mem::replace(arg, Expr::None(span));
                            *arg = Expr::Lambda(Box::new(taken), span);
                        }
                    }
                }
            }
        }
        Expr::Attr(base, _, _, _) => wrap_lazy_args_expr(base),
        Expr::Subscript(base, idx, _) => {
            wrap_lazy_args_expr(base);
            wrap_lazy_args_expr(idx);
        }
        Expr::List(items, _) => {
            for it in items.iter_mut() {
                wrap_lazy_args_expr(it);
            }
        }
        Expr::ListComp { elt, iter, cond, .. } => {
            wrap_lazy_args_expr(elt);
            wrap_lazy_args_expr(iter);
            if let Some(c) = cond {
                wrap_lazy_args_expr(c);
            }
        }
        Expr::BinOp(l, _, r, _) => {
            wrap_lazy_args_expr(l);
            wrap_lazy_args_expr(r);
        }
        Expr::UnOp(_, e, _) => wrap_lazy_args_expr(e),
        Expr::Ternary {
            body, cond, orelse, ..
        } => {
            wrap_lazy_args_expr(body);
            wrap_lazy_args_expr(cond);
            wrap_lazy_args_expr(orelse);
        }
        Expr::Lambda(e, _) => wrap_lazy_args_expr(e),
        Expr::Int(..) | Expr::Float(..) | Expr::Str(..) | Expr::Bool(..) | Expr::None(_)
        | Expr::Ident(..) => {}
    }
}

/// §4.5 step 4: if the body has zero statements, append a no-op; if the
/// final top-level statement is a bare expression, turn it into a
/// `return`; a bare top-level assignment is fine (assigns a local), but a
/// dangling `rec.x = y` style is caught later by
/// [`reject_reserved_assignment`].
fn ensure_trailing_return(body: &mut Body) -> Result<(), TransformError> {
    if body.is_empty() {
        body.push(Stmt::Return(
            Expr::None(crate::ast::Span::new(0, 0)),
            crate::ast::Span::new(0, 0),
        ));
        return Ok(());
    }
    let last = body.len() - 1;
    if let Stmt::Expr(e, span) = &body[last] {
        body[last] = Stmt::Return(e.clone(), *span);
    }
    Ok(())
}

/// §4.5 step 5 / §7: reject assignment to `rec` or one of its attributes;
/// the friendly message suggests `==` for a likely typo'd comparison.
fn reject_reserved_assignment(body: &Body) -> Result<(), TransformError> {
    for stmt in body {
        reject_reserved_assignment_stmt(stmt)?;
    }
    Ok(())
}

fn reject_reserved_assignment_stmt(stmt: &Stmt) -> Result<(), TransformError> {
    match stmt {
        Stmt::Assign { target, .. } => {
            let is_reserved = match target {
                Expr::Ident(name, _) => name == "rec",
                Expr::Attr(base, _, _, _) => matches!(&**base, Expr::Ident(n, _) if n == "rec"),
                _ => false,
            };
            if is_reserved {
                return Err(TransformError(GristError::from(
                    GristErrorKind::ReservedAssignment,
                )));
            }
            Ok(())
        }
        Stmt::If { body, orelse, .. } => {
            for s in body.iter().chain(orelse.iter()) {
                reject_reserved_assignment_stmt(s)?;
            }
            Ok(())
        }
        Stmt::Return(..) | Stmt::Expr(..) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_returns_default() {
        let t = transform("").unwrap();
        assert!(t.was_empty);
    }

    #[test]
    fn trailing_expression_becomes_return() {
        let t = transform("$amount * 2").unwrap();
        assert!(matches!(t.body[0], Stmt::Return(..)));
    }

    #[test]
    fn if_wraps_both_branches_lazily() {
        let t = transform("IF($x > 0, 1 / $x, 0)").unwrap();
        let Stmt::Return(Expr::Call { args, .. }, _) = &t.body[0] else {
            panic!("expected call")
        };
        assert!(matches!(args[1], Expr::Lambda(..)));
        assert!(matches!(args[2], Expr::Lambda(..)));
    }

    #[test]
    fn assignment_to_rec_is_rejected() {
        let err = transform("rec.total = 1").unwrap_err();
        assert!(matches!(err.0.kind, GristErrorKind::ReservedAssignment));
    }

    #[test]
    fn syntax_error_maps_back_to_source_position() {
        let err = transform("$a +").unwrap_err();
        assert!(matches!(err.0.kind, GristErrorKind::SyntaxError { .. }));
    }
}
