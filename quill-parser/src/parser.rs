//! Recursive-descent parser producing the Quill AST

use crate::error::{ParseError, ParseResult};
use crate::lexer::{tokenize, Spanned, Token};
use quill_core::ast::*;
use quill_core::Span;
use std::mem::discriminant;

/// Default limit on expression/statement nesting
pub const DEFAULT_MAX_DEPTH: usize = 256;

pub struct Parser<'a> {
    tokens: Vec<Spanned<'a>>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    eof: Span,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> ParseResult<Self> {
        let tokens = tokenize(source).map_err(ParseError::InvalidToken)?;
        let eof = tokens.last().map(|t| t.span).unwrap_or_default();
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            eof: Span::new(eof.end, eof.end),
        })
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parses a whole program and checks that every token was consumed
    pub fn parse_program(&mut self) -> ParseResult<Block> {
        let start = self.current_span();
        let stmts = self.parse_stmts()?;
        if let Some(tok) = self.peek() {
            return Err(self.unexpected(tok.clone(), "statement"));
        }
        Ok(Block::new(stmts, start.merge(self.prev_span())))
    }

    /// Parses a single expression, allowing surrounding newlines
    pub fn parse_standalone_expression(&mut self) -> ParseResult<Expr> {
        self.skip_newlines();
        let expr = self.parse_expression()?;
        self.skip_terminators();
        if let Some(tok) = self.peek() {
            return Err(self.unexpected(tok.clone(), "end of expression"));
        }
        Ok(expr)
    }

    // ========== Token helpers ==========

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token<'a>> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn current_span(&self) -> Span {
        self.tokens.get(self.pos).map(|t| t.span).unwrap_or(self.eof)
    }

    fn prev_span(&self) -> Span {
        match self.pos {
            0 => self.current_span(),
            n => self.tokens[n - 1].span,
        }
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let tok = self.tokens.get(self.pos).map(|t| t.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token<'_>) -> bool {
        self.peek().map(discriminant) == Some(discriminant(expected))
    }

    fn eat(&mut self, expected: &Token<'_>) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume(&mut self, expected: Token<'_>, what: &str) -> ParseResult<Span> {
        if self.check(&expected) {
            self.pos += 1;
            Ok(self.prev_span())
        } else {
            Err(self.unexpected_current(what))
        }
    }

    fn unexpected(&self, found: Token<'_>, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            span: self.current_span(),
            expected: expected.to_string(),
            found: found.describe(),
        }
    }

    fn unexpected_current(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(tok) => self.unexpected(tok.clone(), expected),
            None => ParseError::UnexpectedEof {
                span: self.eof,
                expected: expected.to_string(),
            },
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn skip_terminators(&mut self) {
        while self.eat(&Token::Newline) || self.eat(&Token::Semicolon) {}
    }

    /// True if the next non-newline token matches, without consuming newlines
    fn check_past_newlines(&self, expected: &Token<'_>) -> bool {
        let mut n = 0;
        while let Some(Token::Newline) = self.peek_nth(n) {
            n += 1;
        }
        self.peek_nth(n).map(discriminant) == Some(discriminant(expected))
    }

    fn ident(&mut self, what: &str) -> ParseResult<Ident> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.to_string();
                self.pos += 1;
                Ok(Ident::new(name, self.prev_span()))
            }
            _ => Err(self.unexpected_current(what)),
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ParseError::MaxDepthExceeded {
                span: self.current_span(),
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ========== Statements ==========

    fn parse_stmts(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek() {
                None | Some(Token::RBrace) | Some(Token::Case) | Some(Token::Default) => break,
                _ => {}
            }
            stmts.push(self.parse_stmt()?);
            match self.peek() {
                None
                | Some(Token::Newline)
                | Some(Token::Semicolon)
                | Some(Token::RBrace)
                | Some(Token::Case)
                | Some(Token::Default) => {}
                Some(tok) => return Err(self.unexpected(tok.clone(), "end of statement")),
            }
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let start = self.consume(Token::LBrace, "`{`")?;
        self.enter()?;
        let stmts = self.parse_stmts()?;
        self.leave();
        let end = self.consume(Token::RBrace, "`}`")?;
        Ok(Block::new(stmts, start.merge(end)))
    }

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let kind = match self.peek() {
            Some(Token::If) => self.parse_if()?,
            Some(Token::For) => self.parse_for()?,
            Some(Token::Switch) => self.parse_switch()?,
            Some(Token::Try) => self.parse_try()?,
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::Break) => {
                self.advance();
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Some(Token::Fallthrough) => {
                self.advance();
                StmtKind::Fallthrough
            }
            Some(Token::Return) => {
                self.advance();
                let values = if self.at_stmt_end() {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                StmtKind::Return(values)
            }
            Some(Token::Defer) => {
                self.advance();
                if self.check(&Token::LBrace) {
                    StmtKind::Defer(DeferBody::Block(self.parse_block()?))
                } else {
                    StmtKind::Defer(DeferBody::Call(self.parse_expression()?))
                }
            }
            Some(Token::Go) => {
                self.advance();
                let call = self.parse_expression()?;
                if !matches!(call.kind, ExprKind::Call { .. }) {
                    return Err(ParseError::InvalidSyntax {
                        span: call.span,
                        message: "`go` requires a function call".into(),
                    });
                }
                StmtKind::Go(call)
            }
            Some(Token::Assert) => {
                self.advance();
                let cond = self.parse_expression()?;
                let message = if self.eat(&Token::Comma) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                StmtKind::Assert { cond, message }
            }
            Some(Token::Func) if matches!(self.peek_nth(1), Some(Token::Ident(_))) => {
                StmtKind::Function(self.parse_function_lit()?)
            }
            Some(Token::Var) => self.parse_var()?,
            _ => self.parse_simple_stmt()?,
        };
        Ok(Stmt::new(kind, start.merge(self.prev_span())))
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Newline) | Some(Token::Semicolon) | Some(Token::RBrace)
        )
    }

    fn parse_var(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::Var, "`var`")?;
        let mut names = vec![self.ident("variable name")?];
        while self.eat(&Token::Comma) {
            names.push(self.ident("variable name")?);
        }
        if !self.eat(&Token::Assign) {
            return Ok(StmtKind::Declare(names));
        }
        self.skip_newlines();
        let values = self.parse_expr_list()?;
        let targets = names
            .into_iter()
            .map(|id| Expr::new(ExprKind::Ident(id.name), id.span))
            .collect();
        Ok(StmtKind::Assign {
            targets,
            values,
            mode: AssignMode::Declare,
        })
    }

    /// Assignment, compound assignment, inc/dec, send or expression statement
    fn parse_simple_stmt(&mut self) -> ParseResult<StmtKind> {
        let exprs = self.parse_expr_list()?;
        let op_span = self.current_span();
        let compound = match self.peek() {
            Some(Token::PlusEq) => Some(BinaryOp::Add),
            Some(Token::MinusEq) => Some(BinaryOp::Sub),
            Some(Token::StarEq) => Some(BinaryOp::Mul),
            Some(Token::SlashEq) => Some(BinaryOp::Div),
            Some(Token::PercentEq) => Some(BinaryOp::Mod),
            Some(Token::AmpEq) => Some(BinaryOp::BitAnd),
            Some(Token::PipeEq) => Some(BinaryOp::BitOr),
            Some(Token::CaretEq) => Some(BinaryOp::BitXor),
            Some(Token::AmpCaretEq) => Some(BinaryOp::AndNot),
            Some(Token::ShlEq) => Some(BinaryOp::Shl),
            Some(Token::ShrEq) => Some(BinaryOp::Shr),
            _ => None,
        };

        if let Some(op) = compound {
            let target = self.single(exprs, op_span)?;
            self.advance();
            self.skip_newlines();
            let value = self.parse_expression()?;
            return Ok(StmtKind::CompoundAssign { target, op, value });
        }

        match self.peek() {
            Some(Token::Assign) | Some(Token::Define) => {
                let mode = if self.check(&Token::Define) {
                    AssignMode::Declare
                } else {
                    AssignMode::Assign
                };
                self.advance();
                self.skip_newlines();
                let values = self.parse_expr_list()?;
                Ok(StmtKind::Assign {
                    targets: exprs,
                    values,
                    mode,
                })
            }
            Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                let increment = self.check(&Token::PlusPlus);
                let target = self.single(exprs, op_span)?;
                self.advance();
                Ok(StmtKind::IncDec { target, increment })
            }
            Some(Token::Arrow) => {
                let channel = self.single(exprs, op_span)?;
                self.advance();
                let value = self.parse_expression()?;
                Ok(StmtKind::Send { channel, value })
            }
            _ => Ok(StmtKind::Expr(self.single(exprs, op_span)?)),
        }
    }

    fn single(&self, mut exprs: Vec<Expr>, span: Span) -> ParseResult<Expr> {
        if exprs.len() != 1 {
            return Err(ParseError::InvalidSyntax {
                span,
                message: format!("expected a single expression, found {}", exprs.len()),
            });
        }
        Ok(exprs.remove(0))
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::If, "`if`")?;
        let mut branches = vec![(self.parse_expression()?, self.parse_block()?)];
        let mut otherwise = None;
        loop {
            if self.check_past_newlines(&Token::Elif) {
                self.skip_newlines();
                self.advance();
                branches.push((self.parse_expression()?, self.parse_block()?));
            } else if self.check_past_newlines(&Token::Else) {
                self.skip_newlines();
                self.advance();
                if self.eat(&Token::If) {
                    branches.push((self.parse_expression()?, self.parse_block()?));
                } else {
                    otherwise = Some(self.parse_block()?);
                    break;
                }
            } else {
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::For, "`for`")?;

        if self.check(&Token::LBrace) {
            return Ok(StmtKind::For {
                init: None,
                cond: None,
                post: None,
                body: self.parse_block()?,
            });
        }

        if self.eat(&Token::Range) {
            let subject = self.parse_expression()?;
            return Ok(StmtKind::ForRange {
                targets: Vec::new(),
                mode: RangeMode::Range,
                declare: false,
                subject,
                body: self.parse_block()?,
            });
        }

        if let Some((count, mode, declare)) = self.scan_range_header() {
            let mut targets = Vec::with_capacity(count);
            for i in 0..count {
                if i > 0 {
                    self.consume(Token::Comma, "`,`")?;
                }
                let id = self.ident("loop variable")?;
                targets.push(Expr::new(ExprKind::Ident(id.name), id.span));
            }
            match mode {
                RangeMode::In => {
                    self.consume(Token::In, "`in`")?;
                }
                RangeMode::Range => {
                    self.advance();
                    self.consume(Token::Range, "`range`")?;
                }
            }
            let subject = self.parse_expression()?;
            return Ok(StmtKind::ForRange {
                targets,
                mode,
                declare,
                subject,
                body: self.parse_block()?,
            });
        }

        let init = if self.check(&Token::Semicolon) {
            None
        } else {
            let start = self.current_span();
            let kind = self.parse_simple_stmt()?;
            Some(Stmt::new(kind, start.merge(self.prev_span())))
        };

        if !self.eat(&Token::Semicolon) {
            // `for cond { }`
            let cond = match init.map(|s| s.kind) {
                Some(StmtKind::Expr(e)) => e,
                _ => return Err(self.unexpected_current("`;` or loop condition")),
            };
            return Ok(StmtKind::For {
                init: None,
                cond: Some(cond),
                post: None,
                body: self.parse_block()?,
            });
        }

        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(Token::Semicolon, "`;`")?;
        let post = if self.check(&Token::LBrace) {
            None
        } else {
            let start = self.current_span();
            let kind = self.parse_simple_stmt()?;
            Some(Box::new(Stmt::new(kind, start.merge(self.prev_span()))))
        };
        Ok(StmtKind::For {
            init: init.map(Box::new),
            cond,
            post,
            body: self.parse_block()?,
        })
    }

    /// Recognizes `a, b in` and `a, b = range` / `a, b := range` headers
    fn scan_range_header(&self) -> Option<(usize, RangeMode, bool)> {
        let mut n = 0;
        let mut count = 0;
        loop {
            match self.peek_nth(n) {
                Some(Token::Ident(_)) => count += 1,
                _ => return None,
            }
            n += 1;
            match self.peek_nth(n) {
                Some(Token::Comma) => n += 1,
                Some(Token::In) => return Some((count, RangeMode::In, true)),
                Some(Token::Assign) | Some(Token::Define) => {
                    let declare = matches!(self.peek_nth(n), Some(Token::Define));
                    return match self.peek_nth(n + 1) {
                        Some(Token::Range) => Some((count, RangeMode::Range, declare)),
                        _ => None,
                    };
                }
                _ => return None,
            }
        }
    }

    fn parse_switch(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::Switch, "`switch`")?;
        let subject = if self.check(&Token::LBrace) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(Token::LBrace, "`{`")?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            self.skip_terminators();
            match self.peek() {
                Some(Token::Case) => {
                    let start = self.current_span();
                    self.advance();
                    let values = self.parse_expr_list()?;
                    self.consume(Token::Colon, "`:`")?;
                    let body_start = self.current_span();
                    let stmts = self.parse_stmts()?;
                    let body = Block::new(stmts, body_start.merge(self.prev_span()));
                    cases.push(SwitchCase {
                        values,
                        body,
                        span: start.merge(self.prev_span()),
                    });
                }
                Some(Token::Default) => {
                    let start = self.current_span();
                    self.advance();
                    self.consume(Token::Colon, "`:`")?;
                    if default.is_some() {
                        return Err(ParseError::InvalidSyntax {
                            span: start,
                            message: "multiple defaults in switch".into(),
                        });
                    }
                    let stmts = self.parse_stmts()?;
                    default = Some(Block::new(stmts, start.merge(self.prev_span())));
                }
                Some(Token::RBrace) => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected_current("`case`, `default` or `}`")),
            }
        }
        Ok(StmtKind::Switch {
            subject,
            cases,
            default,
        })
    }

    fn parse_try(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::Try, "`try`")?;
        let body = self.parse_block()?;
        let mut catch = None;
        if self.check_past_newlines(&Token::Catch) {
            self.skip_newlines();
            self.advance();
            let binding = match self.peek() {
                Some(Token::Ident(_)) => Some(self.ident("error variable")?),
                _ => None,
            };
            catch = Some(CatchClause {
                binding,
                body: self.parse_block()?,
            });
        }
        let mut finally = None;
        if self.check_past_newlines(&Token::Finally) {
            self.skip_newlines();
            self.advance();
            finally = Some(self.parse_block()?);
        }
        if catch.is_none() && finally.is_none() {
            return Err(self.unexpected_current("`catch` or `finally`"));
        }
        Ok(StmtKind::Try {
            body,
            catch,
            finally,
        })
    }

    // ========== Expressions ==========

    fn parse_expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expression()?];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            exprs.push(self.parse_expression()?);
        }
        Ok(exprs)
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let result = self.parse_ternary();
        self.leave();
        result
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then = self.parse_expression()?;
        self.skip_newlines();
        self.consume(Token::Colon, "`:`")?;
        self.skip_newlines();
        let otherwise = self.parse_expression()?;
        let span = cond.span.merge(otherwise.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
        let span = lhs.span.merge(rhs.span);
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            self.skip_newlines();
            let rhs = self.parse_and()?;
            lhs = Self::binary(lhs, BinaryOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            self.skip_newlines();
            let rhs = self.parse_comparison()?;
            lhs = Self::binary(lhs, BinaryOp::And, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(lhs),
            };
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_additive()?;
            lhs = Self::binary(lhs, op, rhs);
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                Some(Token::Pipe) => BinaryOp::BitOr,
                Some(Token::Caret) => BinaryOp::BitXor,
                _ => return Ok(lhs),
            };
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(lhs, op, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                Some(Token::Shl) => BinaryOp::Shl,
                Some(Token::Shr) => BinaryOp::Shr,
                Some(Token::Amp) => BinaryOp::BitAnd,
                Some(Token::AmpCaret) => BinaryOp::AndNot,
                _ => return Ok(lhs),
            };
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_unary()?;
            lhs = Self::binary(lhs, op, rhs);
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Caret) => UnaryOp::BitNot,
            Some(Token::Arrow) => UnaryOp::Recv,
            _ => return self.parse_postfix(),
        };
        let start = self.current_span();
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let operand = operand?;
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let (args, spread) = self.parse_call_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            spread,
                        },
                        span,
                    );
                }
                Some(Token::Dot) => {
                    self.advance();
                    let name = self.ident("member name")?;
                    let span = expr.span.merge(name.span);
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            name: name.name,
                        },
                        span,
                    );
                }
                Some(Token::LBracket) => {
                    self.advance();
                    expr = self.parse_index_or_slice(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> ParseResult<(Vec<Expr>, bool)> {
        let mut args = Vec::new();
        let mut spread = false;
        self.skip_newlines();
        while !self.check(&Token::RParen) {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Ellipsis) {
                spread = true;
                self.skip_newlines();
                break;
            }
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.consume(Token::RParen, "`)`")?;
        Ok((args, spread))
    }

    fn parse_index_or_slice(&mut self, object: Expr) -> ParseResult<Expr> {
        let low = if self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        if self.eat(&Token::RBracket) {
            let span = object.span.merge(self.prev_span());
            let index = low.ok_or_else(|| self.unexpected_current("index expression"))?;
            return Ok(Expr::new(
                ExprKind::Index {
                    object: Box::new(object),
                    index,
                },
                span,
            ));
        }
        self.consume(Token::Colon, "`:` or `]`")?;
        let high = if self.check(&Token::Colon) || self.check(&Token::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&Token::Colon) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.consume(Token::RBracket, "`]`")?;
        let span = object.span.merge(self.prev_span());
        Ok(Expr::new(
            ExprKind::Slice {
                object: Box::new(object),
                low,
                high,
                step,
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => return Err(self.unexpected_current("expression")),
        };
        let kind = match tok {
            Token::Int(text) => {
                self.advance();
                ExprKind::Literal(Literal::Int(text.to_string()))
            }
            Token::Float(text) => {
                self.advance();
                ExprKind::Literal(Literal::Float(text.to_string()))
            }
            Token::Str(s) => {
                self.advance();
                ExprKind::Literal(Literal::String(s))
            }
            Token::Bytes(b) => {
                self.advance();
                ExprKind::Literal(Literal::Bytes(b))
            }
            Token::True | Token::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(matches!(tok, Token::True)))
            }
            Token::Nil => {
                self.advance();
                ExprKind::Literal(Literal::Nil)
            }
            Token::Undefined => {
                self.advance();
                ExprKind::Literal(Literal::Undefined)
            }
            Token::Ident(name) => {
                self.advance();
                ExprKind::Ident(name.to_string())
            }
            Token::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expression()?;
                self.skip_newlines();
                self.consume(Token::RParen, "`)`")?;
                return Ok(Expr::new(inner.kind, start.merge(self.prev_span())));
            }
            Token::LBracket if self.is_type_start_at(0) => self.parse_type_or_cast()?,
            Token::LBracket => {
                self.advance();
                let items = self.parse_delimited(Token::RBracket, "`]`", |p| p.parse_expression())?;
                ExprKind::SliceLit(items)
            }
            Token::LBrace => {
                self.advance();
                let pairs = self.parse_delimited(Token::RBrace, "`}`", |p| {
                    let key = p.parse_expression()?;
                    p.consume(Token::Colon, "`:`")?;
                    p.skip_newlines();
                    let value = p.parse_expression()?;
                    Ok((key, value))
                })?;
                ExprKind::MapLit(pairs)
            }
            Token::Func => ExprKind::Function(Box::new(self.parse_function_lit()?)),
            Token::Make => {
                self.advance();
                self.consume(Token::LParen, "`(`")?;
                self.skip_newlines();
                let ty = self.parse_type()?;
                let mut args = Vec::new();
                while self.eat(&Token::Comma) {
                    self.skip_newlines();
                    args.push(self.parse_expression()?);
                }
                self.skip_newlines();
                self.consume(Token::RParen, "`)`")?;
                ExprKind::Make { ty, args }
            }
            Token::Panic => {
                self.advance();
                self.consume(Token::LParen, "`(`")?;
                self.skip_newlines();
                let payload = self.parse_expression()?;
                self.skip_newlines();
                self.consume(Token::RParen, "`)`")?;
                ExprKind::Panic(Box::new(payload))
            }
            Token::Recover => {
                self.advance();
                self.consume(Token::LParen, "`(`")?;
                self.consume(Token::RParen, "`)`")?;
                ExprKind::Recover
            }
            Token::IntType
            | Token::FloatType
            | Token::StringType
            | Token::BytesType
            | Token::BoolType
            | Token::AnyType
            | Token::Map
            | Token::Chan => self.parse_type_or_cast()?,
            other => return Err(self.unexpected(other, "expression")),
        };
        Ok(Expr::new(kind, start.merge(self.prev_span())))
    }

    fn parse_delimited<T>(
        &mut self,
        close: Token<'_>,
        what: &str,
        mut item: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        let mut items = Vec::new();
        self.skip_newlines();
        while !self.check(&close) {
            items.push(item(self)?);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.consume(close, what)?;
        Ok(items)
    }

    /// `[]` followed by a type starts a slice type rather than an empty literal
    fn is_type_start_at(&self, n: usize) -> bool {
        matches!(self.peek_nth(n), Some(Token::LBracket))
            && matches!(self.peek_nth(n + 1), Some(Token::RBracket))
            && matches!(
                self.peek_nth(n + 2),
                Some(Token::IntType)
                    | Some(Token::FloatType)
                    | Some(Token::StringType)
                    | Some(Token::BytesType)
                    | Some(Token::BoolType)
                    | Some(Token::AnyType)
                    | Some(Token::Map)
                    | Some(Token::Chan)
                    | Some(Token::LBracket)
            )
    }

    fn parse_type_or_cast(&mut self) -> ParseResult<ExprKind> {
        let ty = self.parse_type()?;
        if self.eat(&Token::LParen) {
            self.skip_newlines();
            let value = self.parse_expression()?;
            self.skip_newlines();
            self.consume(Token::RParen, "`)`")?;
            return Ok(ExprKind::Cast {
                ty,
                value: Box::new(value),
            });
        }
        Ok(ExprKind::Type(ty))
    }

    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        self.enter()?;
        let ty = self.parse_type_inner();
        self.leave();
        ty
    }

    fn parse_type_inner(&mut self) -> ParseResult<TypeExpr> {
        let ty = match self.advance() {
            Some(Token::IntType) => TypeExpr::Int,
            Some(Token::FloatType) => TypeExpr::Float,
            Some(Token::StringType) => TypeExpr::String,
            Some(Token::BytesType) => TypeExpr::Bytes,
            Some(Token::BoolType) => TypeExpr::Bool,
            Some(Token::AnyType) => TypeExpr::Any,
            Some(Token::LBracket) => {
                self.consume(Token::RBracket, "`]`")?;
                TypeExpr::Slice(Box::new(self.parse_type()?))
            }
            Some(Token::Map) => {
                self.consume(Token::LBracket, "`[`")?;
                let key = self.parse_type()?;
                self.consume(Token::RBracket, "`]`")?;
                TypeExpr::Map(Box::new(key), Box::new(self.parse_type()?))
            }
            Some(Token::Chan) => TypeExpr::Chan(Box::new(self.parse_type()?)),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected_current("type"));
            }
        };
        Ok(ty)
    }

    fn parse_function_lit(&mut self) -> ParseResult<FunctionLit> {
        let start = self.consume(Token::Func, "`func`")?;
        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.ident("function name")?),
            _ => None,
        };
        self.consume(Token::LParen, "`(`")?;
        let mut params = Vec::new();
        let mut variadic = false;
        self.skip_newlines();
        while !self.check(&Token::RParen) {
            if variadic {
                return Err(ParseError::InvalidSyntax {
                    span: self.current_span(),
                    message: "variadic parameter must be last".into(),
                });
            }
            params.push(self.ident("parameter name")?);
            if self.eat(&Token::Ellipsis) {
                variadic = true;
            }
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.consume(Token::RParen, "`)`")?;
        let body = self.parse_block()?;
        Ok(FunctionLit {
            name,
            params,
            variadic,
            span: start.merge(body.span),
            body,
        })
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
