//! Tokenizer for formula bodies (§4.5). The source language is a small
//! Python-flavored expression/statement language: identifiers, `$col`
//! sugar, attribute/call/subscript chains, comparisons, boolean/arith
//! operators, list literals and comprehensions, `if`/`return`/assignment
//! statements.

use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    DollarIdent, // `$col`
    Int,
    Float,
    Str,
    Keyword,
    // punctuation / operators
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Assign,  // =
    Eq,      // ==
    NotEq,   // !=
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

pub const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "return", "and", "or", "not", "in", "for", "lambda", "None", "True",
    "False",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// 1-based line/col in the *tokenized* text, mapped back to user
    /// source by the transformer's span map.
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub pos: usize,
}

impl Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LexError: {} at {}", self.message, self.pos)
    }
}
impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    paren_depth: i32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            paren_depth: 0,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn make(&self, kind: TokenKind, start: usize, line: u32, col: u32) -> Token {
        Token {
            kind,
            text: self.src[start..self.pos].to_string(),
            start,
            end: self.pos,
            line,
            col,
        }
    }

    /// Tokenize the whole body. Blank lines and comments are skipped;
    /// newlines inside parens/brackets are skipped too (implicit
    /// continuation), matching Python's own lexing rule.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            self.skip_inline_space_and_comments();
            let (line, col) = (self.line, self.col);
            let start = self.pos;
            let Some(b) = self.peek_byte() else {
                out.push(self.make(TokenKind::Eof, start, line, col));
                break;
            };
            match b {
                b'\n' => {
                    self.advance();
                    if self.paren_depth == 0 {
                        out.push(Token {
                            kind: TokenKind::Newline,
                            text: "\n".into(),
                            start,
                            end: self.pos,
                            line,
                            col,
                        });
                    }
                }
                b'$' => {
                    self.advance();
                    let id_start = self.pos;
                    while self
                        .peek_byte()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
                    {
                        self.advance();
                    }
                    if self.pos == id_start {
                        return Err(LexError {
                            message: "expected identifier after '$'".into(),
                            pos: start,
                        });
                    }
                    out.push(self.make(TokenKind::DollarIdent, start, line, col));
                }
                _ if b.is_ascii_alphabetic() || b == b'_' => {
                    while self
                        .peek_byte()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
                    {
                        self.advance();
                    }
                    let text = &self.src[start..self.pos];
                    let kind = if KEYWORDS.contains(&text) {
                        TokenKind::Keyword
                    } else {
                        TokenKind::Ident
                    };
                    out.push(self.make(kind, start, line, col));
                }
                _ if b.is_ascii_digit() => {
                    let mut is_float = false;
                    while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                        self.advance();
                    }
                    if self.peek_byte() == Some(b'.') {
                        is_float = true;
                        self.advance();
                        while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                            self.advance();
                        }
                    }
                    out.push(self.make(
                        if is_float {
                            TokenKind::Float
                        } else {
                            TokenKind::Int
                        },
                        start,
                        line,
                        col,
                    ));
                }
                b'"' | b'\'' => {
                    let quote = b;
                    self.advance();
                    loop {
                        match self.peek_byte() {
                            None => {
                                return Err(LexError {
                                    message: "unterminated string literal".into(),
                                    pos: start,
                                });
                            }
                            Some(c) if c == quote => {
                                self.advance();
                                break;
                            }
                            Some(b'\\') => {
                                self.advance();
                                self.advance();
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                    out.push(self.make(TokenKind::Str, start, line, col));
                }
                b'(' | b'[' => {
                    self.advance();
                    self.paren_depth += 1;
                    out.push(self.make(
                        if b == b'(' {
                            TokenKind::LParen
                        } else {
                            TokenKind::LBracket
                        },
                        start,
                        line,
                        col,
                    ));
                }
                b')' | b']' => {
                    self.advance();
                    self.paren_depth -= 1;
                    out.push(self.make(
                        if b == b')' {
                            TokenKind::RParen
                        } else {
                            TokenKind::RBracket
                        },
                        start,
                        line,
                        col,
                    ));
                }
                b'.' => {
                    self.advance();
                    out.push(self.make(TokenKind::Dot, start, line, col));
                }
                b',' => {
                    self.advance();
                    out.push(self.make(TokenKind::Comma, start, line, col));
                }
                b':' => {
                    self.advance();
                    out.push(self.make(TokenKind::Colon, start, line, col));
                }
                b'+' => {
                    self.advance();
                    out.push(self.make(TokenKind::Plus, start, line, col));
                }
                b'-' => {
                    self.advance();
                    out.push(self.make(TokenKind::Minus, start, line, col));
                }
                b'*' => {
                    self.advance();
                    out.push(self.make(TokenKind::Star, start, line, col));
                }
                b'/' => {
                    self.advance();
                    out.push(self.make(TokenKind::Slash, start, line, col));
                }
                b'%' => {
                    self.advance();
                    out.push(self.make(TokenKind::Percent, start, line, col));
                }
                b'=' => {
                    self.advance();
                    if self.peek_byte() == Some(b'=') {
                        self.advance();
                        out.push(self.make(TokenKind::Eq, start, line, col));
                    } else {
                        out.push(self.make(TokenKind::Assign, start, line, col));
                    }
                }
                b'!' => {
                    self.advance();
                    if self.peek_byte() == Some(b'=') {
                        self.advance();
                        out.push(self.make(TokenKind::NotEq, start, line, col));
                    } else {
                        return Err(LexError {
                            message: "unexpected '!'".into(),
                            pos: start,
                        });
                    }
                }
                b'<' => {
                    self.advance();
                    if self.peek_byte() == Some(b'=') {
                        self.advance();
                        out.push(self.make(TokenKind::Le, start, line, col));
                    } else {
                        out.push(self.make(TokenKind::Lt, start, line, col));
                    }
                }
                b'>' => {
                    self.advance();
                    if self.peek_byte() == Some(b'=') {
                        self.advance();
                        out.push(self.make(TokenKind::Ge, start, line, col));
                    } else {
                        out.push(self.make(TokenKind::Gt, start, line, col));
                    }
                }
                _ => {
                    return Err(LexError {
                        message: format!("unexpected character '{}'", b as char),
                        pos: start,
                    });
                }
            }
        }
        Ok(out)
    }

    fn skip_inline_space_and_comments(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'#') => {
                    while self.peek_byte().is_some_and(|c| c != b'\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_dollar_sugar() {
        let toks = Lexer::new("$amount + 1").tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::DollarIdent);
        assert_eq!(toks[0].text, "$amount");
    }

    #[test]
    fn tokenizes_comparison_operators() {
        let toks = Lexer::new("$a == $b and $c != 1").tokenize().unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::Eq));
        assert!(kinds.contains(&TokenKind::NotEq));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
