//! Recursive-descent parser producing a [`Program`].
//!
//! Precedence, lowest to highest: `lambda`, conditional expression, `or`,
//! `and`, `not`, comparisons, `|`, `^`, `&`, `+ -`, `* / // %`, unary
//! `- + ~`, `**`, then calls/subscripts/attributes.

use crate::error::CoreError;

use super::ast::{
    BinOp, BoolOp, CmpOp, Comprehension, Expr, ExprKind, FStringPart, ImportAlias, KeywordArg,
    Program, Stmt, StmtKind, Target, UnaryOp,
};
use super::lexer::tokenize;
use super::token::{Keyword, Punct, RawFStringPart, Token, TokenKind};

/// Maximum nesting of expressions, operator chains and blocks. Every tree
/// walker recurses over the parsed program, so its depth must stay bounded for
/// adversarial input such as thousands of opening parentheses or `1+1+...`.
pub const MAX_NESTING: usize = 100;

/// Parse snippet source into a [`Program`].
///
/// # Errors
/// Returns [`CoreError::Syntax`] describing the first problem found.
pub fn parse(source: &str) -> Result<Program, CoreError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens, 0).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self { tokens, pos: 0, depth }
    }

    // ── Token cursor ────────────────────────────────────────────────────────

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn check_punct(&self, punct: Punct) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == punct)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> Result<(), CoreError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", punct.as_str())))
        }
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<(), CoreError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", kw.as_str())))
        }
    }

    fn expect_name(&mut self) -> Result<String, CoreError> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        let token = self.current();
        CoreError::syntax(token.line, token.column, message)
    }

    fn unexpected(&self, context: &str) -> CoreError {
        self.error(format!("{context}, found {}", self.peek()))
    }

    fn enter(&mut self) -> Result<(), CoreError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nesting exceeds {MAX_NESTING} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Each link of a left-deep operator or trailer chain adds one tree level.
    fn leave_chain(&mut self, links: usize) {
        self.depth = self.depth.saturating_sub(links);
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Newline | TokenKind::Eof)
    }

    // ── Statements ──────────────────────────────────────────────────────────

    fn program(mut self) -> Result<Program, CoreError> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, CoreError> {
        match self.peek() {
            TokenKind::Keyword(Keyword::If) => Ok(vec![self.if_statement()?]),
            TokenKind::Keyword(Keyword::While) => Ok(vec![self.while_statement()?]),
            TokenKind::Keyword(Keyword::For) => Ok(vec![self.for_statement()?]),
            TokenKind::Keyword(
                kw @ (Keyword::Def
                | Keyword::Class
                | Keyword::Try
                | Keyword::With
                | Keyword::Async
                | Keyword::Except
                | Keyword::Finally),
            ) => Err(self.error(format!("'{}' statements are not supported", kw.as_str()))),
            TokenKind::Indent => Err(self.error("unexpected indent")),
            _ => self.simple_line(),
        }
    }

    /// One or more `;`-separated simple statements terminated by a newline.
    fn simple_line(&mut self) -> Result<Vec<Stmt>, CoreError> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_punct(Punct::Semicolon) {
            if self.at_line_end() {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(stmts)
            }
            TokenKind::Eof => Ok(stmts),
            _ => Err(self.unexpected("invalid syntax")),
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt, CoreError> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Import) => self.import_statement()?,
            TokenKind::Keyword(Keyword::From) => self.from_statement()?,
            TokenKind::Keyword(
                kw @ (Keyword::Return
                | Keyword::Del
                | Keyword::Global
                | Keyword::Nonlocal
                | Keyword::Raise
                | Keyword::Assert
                | Keyword::Yield
                | Keyword::Await),
            ) => {
                return Err(self.error(format!("'{}' is not supported", kw.as_str())));
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, CoreError> {
        let first = self.expression_list()?;

        if let Some(op) = self.augmented_op() {
            self.advance();
            let target = Self::to_target(first)?;
            if matches!(target, Target::Unpack(_)) {
                return Err(self.error("illegal target for augmented assignment"));
            }
            let value = self.expression_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.check_punct(Punct::Assign) {
            let mut targets = Vec::new();
            let mut last = first;
            while self.eat_punct(Punct::Assign) {
                targets.push(Self::to_target(last)?);
                last = self.expression_list()?;
            }
            return Ok(StmtKind::Assign { targets, value: last });
        }

        Ok(StmtKind::Expr(first))
    }

    fn augmented_op(&self) -> Option<BinOp> {
        match self.peek() {
            TokenKind::Punct(Punct::PlusEq) => Some(BinOp::Add),
            TokenKind::Punct(Punct::MinusEq) => Some(BinOp::Sub),
            TokenKind::Punct(Punct::StarEq) => Some(BinOp::Mul),
            TokenKind::Punct(Punct::SlashEq) => Some(BinOp::Div),
            TokenKind::Punct(Punct::DoubleSlashEq) => Some(BinOp::FloorDiv),
            TokenKind::Punct(Punct::PercentEq) => Some(BinOp::Mod),
            _ => None,
        }
    }

    fn to_target(expr: Expr) -> Result<Target, CoreError> {
        let line = expr.line;
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Unpack(
                items.into_iter().map(Self::to_target).collect::<Result<_, _>>()?,
            )),
            ExprKind::Subscript { value, index } => Ok(Target::Subscript { object: value, index }),
            ExprKind::Attribute { .. } => Err(CoreError::syntax(
                line,
                1,
                "assignment to attributes is not supported",
            )),
            _ => Err(CoreError::syntax(line, 1, "cannot assign to expression")),
        }
    }

    fn import_statement(&mut self) -> Result<StmtKind, CoreError> {
        self.expect_kw(Keyword::Import)?;
        let mut names = vec![self.import_alias(true)?];
        while self.eat_punct(Punct::Comma) {
            names.push(self.import_alias(true)?);
        }
        Ok(StmtKind::Import { names })
    }

    fn from_statement(&mut self) -> Result<StmtKind, CoreError> {
        self.expect_kw(Keyword::From)?;
        let mut module = String::new();
        while self.eat_punct(Punct::Dot) {
            module.push('.');
        }
        if !self.check_kw(Keyword::Import) {
            module.push_str(&self.dotted_name()?);
        }
        self.expect_kw(Keyword::Import)?;

        if self.check_punct(Punct::Star) {
            return Err(self.error("wildcard imports are not supported"));
        }
        let parenthesised = self.eat_punct(Punct::LParen);
        let mut names = vec![self.import_alias(false)?];
        while self.eat_punct(Punct::Comma) {
            if parenthesised && self.check_punct(Punct::RParen) {
                break;
            }
            names.push(self.import_alias(false)?);
        }
        if parenthesised {
            self.expect_punct(Punct::RParen)?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn import_alias(&mut self, dotted: bool) -> Result<ImportAlias, CoreError> {
        let name = if dotted { self.dotted_name()? } else { self.expect_name()? };
        let alias = if self.eat_kw(Keyword::As) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(ImportAlias { name, alias })
    }

    fn dotted_name(&mut self) -> Result<String, CoreError> {
        let mut name = self.expect_name()?;
        while self.eat_punct(Punct::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, CoreError> {
        self.expect_punct(Punct::Colon)?;
        self.enter()?;
        let body = if self.eat_newline() {
            if !matches!(self.peek(), TokenKind::Indent) {
                return Err(self.error("expected an indented block"));
            }
            self.advance();
            let mut body = Vec::new();
            loop {
                match self.peek() {
                    TokenKind::Dedent => {
                        self.advance();
                        break;
                    }
                    TokenKind::Eof => break,
                    TokenKind::Newline => {
                        self.advance();
                    }
                    _ => body.extend(self.statement()?),
                }
            }
            body
        } else {
            self.simple_line()?
        };
        self.leave();
        Ok(body)
    }

    fn eat_newline(&mut self) -> bool {
        if matches!(self.peek(), TokenKind::Newline) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, CoreError> {
        let line = self.line();
        // Accepts both `if` and `elif`.
        self.advance();
        let test = self.expression()?;
        let body = self.block()?;
        let orelse = if self.check_kw(Keyword::Elif) {
            vec![self.if_statement()?]
        } else if self.eat_kw(Keyword::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, CoreError> {
        let line = self.line();
        self.expect_kw(Keyword::While)?;
        let test = self.expression()?;
        let body = self.block()?;
        if self.check_kw(Keyword::Else) {
            return Err(self.error("'while ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, CoreError> {
        let line = self.line();
        self.expect_kw(Keyword::For)?;
        let target = self.target_list()?;
        self.expect_kw(Keyword::In)?;
        let iter = self.expression_list()?;
        let body = self.block()?;
        if self.check_kw(Keyword::Else) {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    /// Loop/comprehension targets: `x`, `k, v`, `(a, b)`.
    fn target_list(&mut self) -> Result<Target, CoreError> {
        let line = self.line();
        let first = self.bit_or()?;
        if !self.check_punct(Punct::Comma) {
            return Self::to_target(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_kw(Keyword::In) {
                break;
            }
            items.push(self.bit_or()?);
        }
        Self::to_target(Expr::new(ExprKind::Tuple(items), line))
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    /// `a, b, c` at statement level; a single item stays unwrapped.
    fn expression_list(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let first = self.expression()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.ends_expression_list() {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn ends_expression_list(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Punct(
                    Punct::Assign
                        | Punct::Semicolon
                        | Punct::Colon
                        | Punct::RParen
                        | Punct::RBracket
                        | Punct::RBrace
                )
        ) || self.augmented_op().is_some()
    }

    fn expression(&mut self) -> Result<Expr, CoreError> {
        self.enter()?;
        let result = if self.check_kw(Keyword::Lambda) {
            self.lambda()
        } else {
            self.conditional()
        };
        self.leave();
        result
    }

    fn lambda(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        self.expect_kw(Keyword::Lambda)?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::Colon) {
            params.push(self.expect_name()?);
            while self.eat_punct(Punct::Comma) {
                params.push(self.expect_name()?);
            }
        }
        if self.check_punct(Punct::Assign) {
            return Err(self.error("lambda default arguments are not supported"));
        }
        self.expect_punct(Punct::Colon)?;
        let body = self.expression()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            line,
        ))
    }

    fn conditional(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let body = self.or_test()?;
        if !self.eat_kw(Keyword::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw(Keyword::Else)?;
        let orelse = self.expression()?;
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            line,
        ))
    }

    fn or_test(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.and_test()?;
        let mut links = 0;
        while self.check_kw(Keyword::Or) {
            let line = self.line();
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.and_test()?;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        self.leave_chain(links);
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.not_test()?;
        let mut links = 0;
        while self.check_kw(Keyword::And) {
            let line = self.line();
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.not_test()?;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        self.leave_chain(links);
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, CoreError> {
        if !self.check_kw(Keyword::Not) {
            return self.comparison();
        }
        let line = self.line();
        self.advance();
        self.enter()?;
        let operand = self.not_test();
        self.leave();
        Ok(Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            },
            line,
        ))
    }

    fn comparison(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let left = self.bit_or()?;
        let mut comparisons = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Punct(Punct::EqEq) => CmpOp::Eq,
                TokenKind::Punct(Punct::NotEq) => CmpOp::NotEq,
                TokenKind::Punct(Punct::Lt) => CmpOp::Lt,
                TokenKind::Punct(Punct::Le) => CmpOp::LtE,
                TokenKind::Punct(Punct::Gt) => CmpOp::Gt,
                TokenKind::Punct(Punct::Ge) => CmpOp::GtE,
                TokenKind::Keyword(Keyword::In) => CmpOp::In,
                TokenKind::Keyword(Keyword::Not)
                    if matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::In)) =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Keyword(Keyword::Is) => {
                    if matches!(self.peek_nth(1), TokenKind::Keyword(Keyword::Not)) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            comparisons.push((op, self.bit_or()?));
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                comparisons,
            },
            line,
        ))
    }

    fn binary_level(
        &mut self,
        operators: &[(Punct, BinOp)],
        next: fn(&mut Self) -> Result<Expr, CoreError>,
    ) -> Result<Expr, CoreError> {
        let mut left = next(self)?;
        let mut links = 0;
        loop {
            let found = operators
                .iter()
                .find(|(punct, _)| self.check_punct(*punct))
                .map(|(_, op)| *op);
            let Some(op) = found else { break };
            let line = self.line();
            self.advance();
            self.enter()?;
            links += 1;
            let right = next(self)?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        self.leave_chain(links);
        Ok(left)
    }

    fn bit_or(&mut self) -> Result<Expr, CoreError> {
        self.binary_level(&[(Punct::Pipe, BinOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Expr, CoreError> {
        self.binary_level(&[(Punct::Caret, BinOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Expr, CoreError> {
        self.binary_level(&[(Punct::Amp, BinOp::BitAnd)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, CoreError> {
        self.binary_level(
            &[(Punct::Plus, BinOp::Add), (Punct::Minus, BinOp::Sub)],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, CoreError> {
        self.binary_level(
            &[
                (Punct::Star, BinOp::Mul),
                (Punct::Slash, BinOp::Div),
                (Punct::DoubleSlash, BinOp::FloorDiv),
                (Punct::Percent, BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, CoreError> {
        let op = match self.peek() {
            TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Pos,
            TokenKind::Punct(Punct::Tilde) => UnaryOp::Invert,
            _ => return self.power(),
        };
        let line = self.line();
        self.advance();
        self.enter()?;
        let operand = self.factor();
        self.leave();
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
            line,
        ))
    }

    fn power(&mut self) -> Result<Expr, CoreError> {
        let base = self.primary()?;
        if !self.check_punct(Punct::DoubleStar) {
            return Ok(base);
        }
        let line = self.line();
        self.advance();
        self.enter()?;
        let exponent = self.factor();
        self.leave();
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent?),
            },
            line,
        ))
    }

    fn primary(&mut self) -> Result<Expr, CoreError> {
        let mut expr = self.atom()?;
        let mut links = 0;
        loop {
            let line = self.line();
            if self.eat_punct(Punct::LParen) {
                let (args, keywords) = self.call_arguments()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    line,
                );
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.subscript()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_punct(Punct::Dot) {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    line,
                );
            } else {
                break;
            }
            self.enter()?;
            links += 1;
        }
        self.leave_chain(links);
        Ok(expr)
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<KeywordArg>), CoreError> {
        let mut args = Vec::new();
        let mut keywords: Vec<KeywordArg> = Vec::new();
        loop {
            if self.eat_punct(Punct::RParen) {
                break;
            }
            if self.check_punct(Punct::Star) || self.check_punct(Punct::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek(), TokenKind::Name(_))
                && matches!(self.peek_nth(1), TokenKind::Punct(Punct::Assign));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_punct(Punct::Assign)?;
                if keywords.iter().any(|k| k.name == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                let value = self.expression()?;
                keywords.push(KeywordArg { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let line = self.line();
                let value = self.expression()?;
                if self.check_kw(Keyword::For) {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::ListComp {
                            element: Box::new(value),
                            generators,
                        },
                        line,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let first = self.subscript_item()?;
        if !self.check_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn subscript_item(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let lower = if self.check_punct(Punct::Colon) {
            None
        } else {
            Some(self.expression()?)
        };
        if !self.eat_punct(Punct::Colon) {
            return lower.ok_or_else(|| self.unexpected("expected subscript"));
        }
        let bound_ends = |p: &Self| {
            p.check_punct(Punct::Colon) || p.check_punct(Punct::RBracket) || p.check_punct(Punct::Comma)
        };
        let upper = if bound_ends(self) { None } else { Some(self.expression()?) };
        let step = if self.eat_punct(Punct::Colon) && !bound_ends(self) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
            line,
        ))
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, CoreError> {
        let mut generators = Vec::new();
        while self.eat_kw(Keyword::For) {
            let target = self.target_list()?;
            self.expect_kw(Keyword::In)?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw(Keyword::If) {
                conditions.push(self.or_test()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, CoreError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            TokenKind::Str(_) | TokenKind::FString(_) => self.string_literal()?,
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                ExprKind::None
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                return self.parenthesised(line);
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                return self.list_display(line);
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                return self.dict_display(line);
            }
            _ => return Err(self.unexpected("invalid syntax")),
        };
        Ok(Expr::new(kind, line))
    }

    /// Adjacent string literals concatenate; any f-string in the run makes
    /// the whole literal an f-string.
    fn string_literal(&mut self) -> Result<ExprKind, CoreError> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            let token = self.current().clone();
            match token.kind {
                TokenKind::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, text);
                }
                TokenKind::FString(raw_parts) => {
                    self.advance();
                    formatted = true;
                    for raw in raw_parts {
                        match raw {
                            RawFStringPart::Text(text) => push_literal(&mut parts, text),
                            RawFStringPart::Field { source, spec } => {
                                let expr = self.embedded_expression(&source, token.line)?;
                                parts.push(FStringPart::Field { expr, spec });
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(ExprKind::FString(parts));
        }
        let text = parts
            .into_iter()
            .map(|part| match part {
                FStringPart::Literal(text) => text,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(ExprKind::Str(text))
    }

    fn embedded_expression(&mut self, source: &str, line: usize) -> Result<Expr, CoreError> {
        let mut tokens = tokenize(source.trim()).map_err(|e| relocate(e, line))?;
        for token in &mut tokens {
            token.line = line;
        }
        let mut inner = Parser::new(tokens, self.depth);
        let expr = inner.expression()?;
        if !inner.at_line_end() {
            return Err(inner.unexpected("invalid f-string expression"));
        }
        Ok(expr)
    }

    fn parenthesised(&mut self, line: usize) -> Result<Expr, CoreError> {
        if self.eat_punct(Punct::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
        }
        let first = self.expression()?;
        if self.check_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_punct(Punct::RParen)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    element: Box::new(first),
                    generators,
                },
                line,
            ));
        }
        if !self.check_punct(Punct::Comma) {
            self.expect_punct(Punct::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RParen) {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_punct(Punct::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn list_display(&mut self, line: usize) -> Result<Expr, CoreError> {
        if self.eat_punct(Punct::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), line));
        }
        let first = self.expression()?;
        if self.check_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_punct(Punct::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    element: Box::new(first),
                    generators,
                },
                line,
            ));
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBracket) {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_punct(Punct::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), line))
    }

    fn dict_display(&mut self, line: usize) -> Result<Expr, CoreError> {
        if self.eat_punct(Punct::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), line));
        }
        if self.check_punct(Punct::DoubleStar) {
            return Err(self.error("dict unpacking is not supported"));
        }
        let key = self.expression()?;
        if !self.eat_punct(Punct::Colon) {
            return Err(self.error("set literals are not supported"));
        }
        let value = self.expression()?;
        if self.check_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_punct(Punct::RBrace)?;
            return Ok(Expr::new(
                ExprKind::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                },
                line,
            ));
        }
        let mut entries = vec![(key, value)];
        while self.eat_punct(Punct::Comma) {
            if self.check_punct(Punct::RBrace) {
                break;
            }
            let key = self.expression()?;
            self.expect_punct(Punct::Colon)?;
            let value = self.expression()?;
            entries.push((key, value));
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(entries), line))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(&text);
    } else {
        parts.push(FStringPart::Literal(text));
    }
}

fn relocate(error: CoreError, line: usize) -> CoreError {
    match error {
        CoreError::Syntax { message, column, .. } => CoreError::Syntax {
            line,
            column,
            message: format!("in f-string: {message}"),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        match parse(source) {
            Ok(program) => program,
            Err(e) => panic!("parse failed for {source:?}: {e}"),
        }
    }

    fn single_expr(source: &str) -> ExprKind {
        let program = parse_ok(source);
        match program.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr.kind,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn empty_source_parses_to_empty_program() {
        assert!(parse_ok("").body.is_empty());
        assert!(parse_ok("\n\n# only a comment\n").body.is_empty());
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        match single_expr("1 + 2 * 3") {
            ExprKind::Binary { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_unary_minus() {
        match single_expr("-2 ** 2") {
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                assert!(matches!(operand.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn chained_assignment_collects_targets() {
        let program = parse_ok("a = b = 1");
        match &program.body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn tuple_unpacking_target() {
        let program = parse_ok("a, b = 1, 2");
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Target::Unpack(items) if items.len() == 2));
                assert!(matches!(&value.kind, ExprKind::Tuple(items) if items.len() == 2));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn method_chain_with_keyword_arguments() {
        let source = "df.sort('a', descending=True).head(3)";
        match single_expr(source) {
            ExprKind::Call { func, args, .. } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(func.kind, ExprKind::Attribute { ref attr, .. } if attr == "head"));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn if_elif_else_nests_in_orelse() {
        let program = parse_ok("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &program.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn comprehensions_and_generator_arguments() {
        assert!(matches!(single_expr("[x * 2 for x in xs if x > 1]"), ExprKind::ListComp { .. }));
        assert!(matches!(single_expr("{k: v for k, v in pairs}"), ExprKind::DictComp { .. }));
        match single_expr("sum(x for x in xs)") {
            ExprKind::Call { args, .. } => assert!(matches!(args[0].kind, ExprKind::ListComp { .. })),
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn slices_parse_all_bounds() {
        match single_expr("xs[1:10:2]") {
            ExprKind::Subscript { index, .. } => {
                assert!(matches!(
                    index.kind,
                    ExprKind::Slice { lower: Some(_), upper: Some(_), step: Some(_) }
                ));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
        assert!(matches!(single_expr("xs[:]"), ExprKind::Subscript { .. }));
    }

    #[test]
    fn fstring_fields_are_parsed_as_expressions() {
        match single_expr("f'{a + 1:.2f} items'") {
            ExprKind::FString(parts) => {
                assert!(matches!(&parts[0], FStringPart::Field { spec: Some(s), .. } if s == ".2f"));
                assert!(matches!(&parts[1], FStringPart::Literal(t) if t == " items"));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn adjacent_strings_concatenate() {
        assert_eq!(single_expr("'a' \"b\""), ExprKind::Str("ab".to_owned()));
    }

    #[test]
    fn imports_record_aliases() {
        let program = parse_ok("import polars as pl\nfrom polars import col, lit as l\n");
        match &program.body[0].kind {
            StmtKind::Import { names } => assert_eq!(names[0].bound_name(), "pl"),
            other => panic!("expected import, got {other:?}"),
        }
        match &program.body[1].kind {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(module, "polars");
                assert_eq!(names[1].bound_name(), "l");
            }
            other => panic!("expected from-import, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_statements_are_syntax_errors() {
        for source in ["def f():\n    pass", "class A:\n    pass", "del x", "return 1", "try:\n    x\n"] {
            assert!(parse(source).is_err(), "{source:?} must be rejected");
        }
    }

    #[test]
    fn attribute_assignment_is_rejected() {
        assert!(parse("obj.attr = 1").is_err());
    }

    #[test]
    fn deeply_nested_parentheses_are_rejected_not_overflowed() {
        let source = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn trailing_bare_name_is_detected() {
        assert_eq!(parse_ok("x = 1\nx").trailing_bare_name(), Some("x"));
        assert_eq!(parse_ok("x = 1").trailing_bare_name(), None);
        assert_eq!(parse_ok("x = 1\nprint(x)").trailing_bare_name(), None);
        assert_eq!(parse_ok("x = 1\n(x)").trailing_bare_name(), Some("x"));
    }

    proptest::proptest! {
        #[test]
        fn proptest_parse_never_panics(source in "\\PC{0,200}") {
            let _ = parse(&source);
        }

        #[test]
        fn proptest_integer_literals_round_trip(value in 0i64..i64::MAX) {
            proptest::prop_assert_eq!(single_expr(&value.to_string()), ExprKind::Int(value));
        }
    }
}
