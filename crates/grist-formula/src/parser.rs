//! Recursive-descent parser over the token stream produced by [`crate::lexer`].
//! Blocks are delimited the way Python's own off-side rule reads them: a
//! header ending in `:` opens a body of statements whose first token sits
//! at a greater column than the header's first token.

use crate::ast::{BinOp, Body, Expr, Span, Stmt, UnOp};
use crate::lexer::{Lexer, Token, TokenKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub pos: usize,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParseError at line {}, col {}: {}",
            self.line, self.col, self.message
        )
    }
}
impl std::error::Error for ParseError {}

pub fn parse_body(src: &str) -> Result<Body, ParseError> {
    let toks = Lexer::new(src).tokenize().map_err(|e| ParseError {
        message: e.message,
        pos: e.pos,
        line: 1,
        col: 1,
    })?;
    Parser::new(toks).parse_program()
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(toks: Vec<Token>) -> Self {
        Self { toks, pos: 0 }
    }

    fn cur(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        self.cur().kind == TokenKind::Eof
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        let t = self.cur();
        ParseError {
            message: message.into(),
            pos: t.start,
            line: t.line,
            col: t.col,
        }
    }

    fn advance(&mut self) -> Token {
        let t = self.cur().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    fn check_kw(&self, kw: &str) -> bool {
        self.cur().kind == TokenKind::Keyword && self.cur().text == kw
    }

    fn eat(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected {kind:?}, found {:?}", self.cur().kind)))
        }
    }

    fn eat_kw(&mut self, kw: &str) -> Result<Token, ParseError> {
        if self.check_kw(kw) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected keyword '{kw}'")))
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Body, ParseError> {
        let mut out = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            out.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(out)
    }

    /// Parses the statements of a block opened by a header at `header_col`:
    /// every statement whose first token sits strictly right of that
    /// column belongs to the block.
    fn parse_block(&mut self, header_col: u32) -> Result<Body, ParseError> {
        let mut out = Vec::new();
        self.skip_newlines();
        if self.cur().col <= header_col && !self.at_eof() {
            return Err(self.err("expected an indented block"));
        }
        while !self.at_eof() && self.cur().col > header_col {
            out.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(out)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.check_kw("if") {
            return self.parse_if();
        }
        if self.check_kw("return") {
            let start = self.cur().start;
            self.advance();
            let value = self.parse_expr()?;
            let end = value.span().end;
            return Ok(Stmt::Return(value, Span::new(start, end)));
        }
        let start = self.cur().start;
        let expr = self.parse_expr()?;
        if self.check(TokenKind::Assign) {
            self.advance();
            let value = self.parse_expr()?;
            let end = value.span().end;
            return Ok(Stmt::Assign {
                target: expr,
                value,
                span: Span::new(start, end),
            });
        }
        let end = expr.span().end;
        Ok(Stmt::Expr(expr, Span::new(start, end)))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let header = self.cur().clone();
        self.advance(); // `if`
        let cond = self.parse_expr()?;
        self.eat(TokenKind::Colon)?;
        let body = self.parse_block(header.col)?;
        let mut orelse = Vec::new();
        // `else:` must sit at the same column as the `if` to belong to it.
        self.skip_newlines();
        if self.check_kw("elif") && self.cur().col == header.col {
            orelse.push(self.parse_if()?);
        } else if self.check_kw("else") && self.cur().col == header.col {
            let else_tok = self.advance();
            self.eat(TokenKind::Colon)?;
            orelse = self.parse_block(else_tok.col)?;
        }
        let span = Span::new(header.start, self.toks[self.pos.saturating_sub(1)].end);
        Ok(Stmt::If {
            cond,
            body,
            orelse,
            span,
        })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let body = self.parse_or()?;
        if self.check_kw("if") {
            self.advance();
            let cond = self.parse_or()?;
            self.eat_kw("else")?;
            let orelse = self.parse_ternary()?;
            let span = Span::new(body.span().start, orelse.span().end);
            return Ok(Expr::Ternary {
                body: Box::new(body),
                cond: Box::new(cond),
                orelse: Box::new(orelse),
                span,
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.check_kw("or") {
            self.advance();
            let rhs = self.parse_and()?;
            let span = Span::new(lhs.span().start, rhs.span().end);
            lhs = Expr::BinOp(Box::new(lhs), BinOp::Or, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.check_kw("and") {
            self.advance();
            let rhs = self.parse_not()?;
            let span = Span::new(lhs.span().start, rhs.span().end);
            lhs = Expr::BinOp(Box::new(lhs), BinOp::And, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check_kw("not") {
            let start = self.cur().start;
            self.advance();
            let operand = self.parse_not()?;
            let span = Span::new(start, operand.span().end);
            return Ok(Expr::UnOp(UnOp::Not, Box::new(operand), span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::NotEq => BinOp::NotEq,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            let span = Span::new(lhs.span().start, rhs.span().end);
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            let span = Span::new(lhs.span().start, rhs.span().end);
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let span = Span::new(lhs.span().start, rhs.span().end);
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check(TokenKind::Minus) {
            let start = self.cur().start;
            self.advance();
            let operand = self.parse_unary()?;
            let span = Span::new(start, operand.span().end);
            return Ok(Expr::UnOp(UnOp::Neg, Box::new(operand), span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.cur().kind {
                TokenKind::Dot => {
                    self.advance();
                    let name_tok = self.eat(TokenKind::Ident)?;
                    let span = Span::new(expr.span().start, name_tok.end);
                    let name_span = Span::new(name_tok.start, name_tok.end);
                    expr = Expr::Attr(Box::new(expr), name_tok.text, span, name_span);
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    let end_tok = self.eat(TokenKind::RParen)?;
                    let span = Span::new(expr.span().start, end_tok.end);
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end_tok = self.eat(TokenKind::RBracket)?;
                    let span = Span::new(expr.span().start, end_tok.end);
                    expr = Expr::Subscript(Box::new(expr), Box::new(index), span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // keyword argument: `ident = expr`
            if self.check(TokenKind::Ident) {
                let save = self.pos;
                let name = self.advance().text;
                if self.check(TokenKind::Assign) {
                    self.advance();
                    let value = self.parse_expr()?;
                    kwargs.push((name, value));
                } else {
                    self.pos = save;
                    args.push(self.parse_expr()?);
                }
            } else {
                args.push(self.parse_expr()?);
            }
            if self.check(TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
                continue;
            }
            break;
        }
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.cur().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let span = Span::new(tok.start, tok.end);
                Ok(Expr::Int(tok.text.parse().unwrap_or(0), span))
            }
            TokenKind::Float => {
                self.advance();
                let span = Span::new(tok.start, tok.end);
                Ok(Expr::Float(tok.text.parse().unwrap_or(0.0), span))
            }
            TokenKind::Str => {
                self.advance();
                let span = Span::new(tok.start, tok.end);
                let inner = &tok.text[1..tok.text.len() - 1];
                Ok(Expr::Str(inner.replace("\\\"", "\"").replace("\\'", "'"), span))
            }
            TokenKind::DollarIdent => {
                self.advance();
                let span = Span::new(tok.start, tok.end);
                // `$col` is sugar for `rec.col`; the transformer rewrites the
                // textual span separately, but the AST already reflects the
                // rewritten meaning so later passes don't special-case it.
                let name = tok.text.trim_start_matches('$').to_string();
                let name_span = Span::new(tok.start + 1, tok.end);
                Ok(Expr::Attr(
                    Box::new(Expr::Ident("rec".into(), span)),
                    name,
                    span,
                    name_span,
                ))
            }
            TokenKind::Ident => {
                self.advance();
                let span = Span::new(tok.start, tok.end);
                Ok(Expr::Ident(tok.text, span))
            }
            TokenKind::Keyword if tok.text == "None" => {
                self.advance();
                Ok(Expr::None(Span::new(tok.start, tok.end)))
            }
            TokenKind::Keyword if tok.text == "True" => {
                self.advance();
                Ok(Expr::Bool(true, Span::new(tok.start, tok.end)))
            }
            TokenKind::Keyword if tok.text == "False" => {
                self.advance();
                Ok(Expr::Bool(false, Span::new(tok.start, tok.end)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.eat(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_list_or_comp(),
            _ => Err(self.err(format!("unexpected token {:?}", tok.kind))),
        }
    }

    fn parse_list_or_comp(&mut self) -> Result<Expr, ParseError> {
        let start_tok = self.advance(); // `[`
        if self.check(TokenKind::RBracket) {
            let end = self.advance().end;
            return Ok(Expr::List(Vec::new(), Span::new(start_tok.start, end)));
        }
        let first = self.parse_expr()?;
        if self.check_kw("for") {
            self.advance();
            let var_tok = self.eat(TokenKind::Ident)?;
            self.eat_kw("in")?;
            let iter = self.parse_or()?;
            let cond = if self.check_kw("if") {
                self.advance();
                Some(Box::new(self.parse_or()?))
            } else {
                None
            };
            let end = self.eat(TokenKind::RBracket)?.end;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                var: var_tok.text,
                iter: Box::new(iter),
                cond,
                span: Span::new(start_tok.start, end),
            });
        }
        let mut items = vec![first];
        while self.check(TokenKind::Comma) {
            self.advance();
            if self.check(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        let end = self.eat(TokenKind::RBracket)?.end;
        Ok(Expr::List(items, Span::new(start_tok.start, end)))
    }
}
