//! Type reference syntax
//!
//! Textual type references as written in compilation units:
//! `name`, `module::name`, `T*`, `T[N]`, `T[]` and `typeof(expr)`.
//!
//! Array lengths and constant values share a small integer expression
//! grammar: literals, constant names, `sizeof(T)`, unary `-` and `~`, the
//! arithmetic, shift and bitwise operators, and parentheses. Names are looked
//! up when parsing; whether they are constant is decided by the resolver.

use crate::frontend::ast::{BinaryOp, Expr, ExprKind, Ident, ModuleId, TypeInfo, TypeInfoId, TypeInfoKind, UnaryOp};
use crate::frontend::semantic::Context;
use crate::types::{PrimitiveType, TypeId};
use crate::utils::{Error, Result, Span};

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(i128),
    ColonColon,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,
    Minus,
    Slash,
    Percent,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Eof,
}

impl TokenKind {
    /// Binding power of an infix operator inside length expressions
    fn binary_precedence(&self) -> Option<(u8, BinaryOp)> {
        match self {
            TokenKind::Pipe => Some((1, BinaryOp::BitOr)),
            TokenKind::Caret => Some((2, BinaryOp::BitXor)),
            TokenKind::Amp => Some((3, BinaryOp::BitAnd)),
            TokenKind::Shl => Some((4, BinaryOp::Shl)),
            TokenKind::Shr => Some((4, BinaryOp::Shr)),
            TokenKind::Plus => Some((5, BinaryOp::Add)),
            TokenKind::Minus => Some((5, BinaryOp::Sub)),
            TokenKind::Star => Some((6, BinaryOp::Mult)),
            TokenKind::Slash => Some((6, BinaryOp::Div)),
            TokenKind::Percent => Some((6, BinaryOp::Mod)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Span,
}

fn tokenize(text: &str, file_id: usize) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let syntax_error = |reason: String| Error::TypeSyntax {
        text: text.to_string(),
        reason,
    };

    while let Some(&(start, c)) = chars.get(i) {
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let (kind, len) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
                    .count();
                let word: String = chars[i..i + len].iter().map(|&(_, c)| c).collect();
                (TokenKind::Ident(word), len)
            }
            c if c.is_ascii_digit() => {
                let len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric())
                    .count();
                let digits: String = chars[i..i + len].iter().map(|&(_, c)| c).collect();
                let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                    Some(hex) => i128::from_str_radix(hex, 16),
                    None => digits.parse::<i128>(),
                }
                .map_err(|_| syntax_error(format!("invalid integer '{}'", digits)))?;
                (TokenKind::Int(value), len)
            }
            ':' if next == Some(':') => (TokenKind::ColonColon, 2),
            '<' if next == Some('<') => (TokenKind::Shl, 2),
            '>' if next == Some('>') => (TokenKind::Shr, 2),
            '*' => (TokenKind::Star, 1),
            '[' => (TokenKind::LBracket, 1),
            ']' => (TokenKind::RBracket, 1),
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '+' => (TokenKind::Plus, 1),
            '-' => (TokenKind::Minus, 1),
            '/' => (TokenKind::Slash, 1),
            '%' => (TokenKind::Percent, 1),
            '&' => (TokenKind::Amp, 1),
            '|' => (TokenKind::Pipe, 1),
            '^' => (TokenKind::Caret, 1),
            '~' => (TokenKind::Tilde, 1),
            other => return Err(syntax_error(format!("unexpected character '{}'", other))),
        };
        let end = chars.get(i + len).map_or(text.len(), |&(offset, _)| offset);
        tokens.push(Token { kind, span: Span::new(start, end, file_id) });
        i += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(text.len(), text.len(), file_id),
    });
    Ok(tokens)
}

/// Parses type references and constant expressions into a [`Context`].
///
/// Names in expressions are looked up from `module`. Spans are byte offsets
/// into the parsed text, tagged with `file_id`.
pub struct TypeParser<'c> {
    ctx: &'c mut Context,
    module: ModuleId,
    text: String,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'c> TypeParser<'c> {
    pub fn new(ctx: &'c mut Context, module: ModuleId, text: &str, file_id: usize) -> Result<Self> {
        Ok(Self {
            ctx,
            module,
            text: text.to_string(),
            tokens: tokenize(text, file_id)?,
            pos: 0,
        })
    }

    /// Parse the whole text as one type reference
    pub fn parse_type_ref(mut self) -> Result<TypeInfoId> {
        let id = self.parse_type()?;
        self.expect_end()?;
        Ok(id)
    }

    /// Parse the whole text as one constant expression
    pub fn parse_const_expr(mut self) -> Result<Expr> {
        let expr = self.parse_expr_bp(0)?;
        self.expect_end()?;
        Ok(expr)
    }

    fn current(&self) -> &Token {
        // The token list always ends in Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::TypeSyntax {
            text: self.text.clone(),
            reason: reason.into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {} at offset {}", what, self.current().span.start)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match &self.current().kind {
            TokenKind::Eof => Ok(()),
            other => Err(self.error(format!(
                "unexpected {:?} at offset {}",
                other,
                self.current().span.start
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<Ident> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok(Ident::new(&name, token.span)),
            other => Err(self.error(format!("expected a name, found {:?}", other))),
        }
    }

    fn is_keyword_call(&self, keyword: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name == keyword)
            && self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::LParen)
    }

    // ==================== Types ====================

    fn parse_type(&mut self) -> Result<TypeInfoId> {
        let start = self.current().span;

        let base = if self.is_keyword_call("typeof") {
            self.advance();
            self.advance();
            let expr = self.parse_expr_bp(0)?;
            let end = self.expect(TokenKind::RParen, "')'")?.span;
            TypeInfo::new(TypeInfoKind::Expression(Box::new(expr)), start.merge(&end))
        } else {
            let first = self.expect_ident()?;
            if self.consume(&TokenKind::ColonColon) {
                let name = self.expect_ident()?;
                let span = start.merge(&name.span);
                TypeInfo::new(
                    TypeInfoKind::Identifier { path: Some(first.name), name },
                    span,
                )
            } else {
                let span = first.span;
                TypeInfo::new(TypeInfoKind::Identifier { path: None, name: first }, span)
            }
        };
        let mut id = self.ctx.alloc_type_info(base);

        loop {
            match self.current().kind {
                TokenKind::Star => {
                    let end = self.advance().span;
                    id = self.ctx.alloc_type_info(TypeInfo::new(TypeInfoKind::Pointer(id), start.merge(&end)));
                }
                TokenKind::LBracket => {
                    self.advance();
                    let len = if self.current().kind == TokenKind::RBracket {
                        None
                    } else {
                        Some(Box::new(self.parse_expr_bp(0)?))
                    };
                    let end = self.expect(TokenKind::RBracket, "']'")?.span;
                    id = self.ctx.alloc_type_info(TypeInfo::new(
                        TypeInfoKind::Array { base: id, len },
                        start.merge(&end),
                    ));
                }
                _ => break,
            }
        }
        Ok(id)
    }

    // ==================== Expressions (Pratt) ====================

    fn long(&self) -> TypeId {
        self.ctx.types.primitive(PrimitiveType::I64)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.parse_primary()?;

        while let Some((bp, op)) = self.current().kind.binary_precedence() {
            if bp < min_bp {
                break;
            }
            self.advance();
            let right = self.parse_expr_bp(bp + 1)?;
            let span = left.span.merge(&right.span);
            left = Expr::binary(op, left, right, self.long()).with_span(span);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::int(*v, self.long()).with_span(token.span))
            }
            TokenKind::Minus | TokenKind::Tilde => {
                self.advance();
                let op = if token.kind == TokenKind::Minus { UnaryOp::Neg } else { UnaryOp::BitNeg };
                // Unary operators bind tighter than any infix operator.
                let inner = self.parse_expr_bp(7)?;
                let span = token.span.merge(&inner.span);
                Ok(Expr::unary(op, inner, self.long()).with_span(span))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr_bp(0)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Ident(_) if self.is_keyword_call("sizeof") => {
                self.advance();
                self.advance();
                let type_info = self.parse_type()?;
                let end = self.expect(TokenKind::RParen, "')'")?.span;
                let usize = self.ctx.types.usize();
                Ok(Expr::new(ExprKind::Sizeof(type_info), usize, token.span.merge(&end)))
            }
            TokenKind::Ident(_) => self.parse_name(),
            other => Err(self.error(format!(
                "expected an expression at offset {}, found {:?}",
                token.span.start, other
            ))),
        }
    }

    fn parse_name(&mut self) -> Result<Expr> {
        let first = self.expect_ident()?;
        let (path, name) = if self.consume(&TokenKind::ColonColon) {
            (Some(first.name), self.expect_ident()?)
        } else {
            (None, first)
        };
        let lookup = self
            .ctx
            .symbols
            .resolve_symbol(self.module, &name.name, path.as_deref(), name.span)?;
        let decl = lookup
            .decl
            .ok_or_else(|| self.error(format!("unknown name '{}'", name.name)))?;
        Ok(Expr::ident(decl, self.long()).with_span(name.span))
    }
}

/// Parse `text` as a type reference visible from `module`
pub fn parse_type_ref(ctx: &mut Context, module: ModuleId, text: &str, file_id: usize) -> Result<TypeInfoId> {
    TypeParser::new(ctx, module, text, file_id)?.parse_type_ref()
}

/// Parse `text` as a constant expression visible from `module`
pub fn parse_const_expr(ctx: &mut Context, module: ModuleId, text: &str, file_id: usize) -> Result<Expr> {
    TypeParser::new(ctx, module, text, file_id)?.parse_const_expr()
}
