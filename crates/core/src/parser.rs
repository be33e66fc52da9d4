//! Recursive-descent formula parser.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparison, additive,
//! multiplicative, unary minus, primary. Function calls are checked against
//! the whitelist and their arity here, so an unknown function never reaches
//! the evaluator. A failed parse yields no AST.

use crate::ast::{BinaryOp, Expr, ExprKind, FieldRef, Literal, Span, UnaryOp};
use crate::error::SyntaxError;
use crate::functions::{self, Function};
use crate::lexer::{self, Spanned, Token};

/// Maximum nesting of sub-expressions before the parser gives up.
pub const MAX_NESTING_DEPTH: usize = 64;

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn advance(&mut self) -> Spanned {
        let t = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<Spanned, SyntaxError> {
        if self.peek() == &expected {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        SyntaxError::unexpected(self.cur().span.start, expected, self.peek().describe())
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(SyntaxError::grammar(
                self.cur().span.start,
                self.cur().lexeme.clone(),
                format!("expression nesting exceeds {} levels", MAX_NESTING_DEPTH),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Build a node, rejecting trees taller than the nesting limit. Operator
    /// chains grow the tree without recursing in the parser, so the height
    /// is checked here rather than in `enter`.
    fn node(&self, at: usize, kind: ExprKind, span: Span) -> Result<Expr, SyntaxError> {
        let expr = Expr::new(kind, span);
        if expr.height() > MAX_NESTING_DEPTH {
            return Err(SyntaxError::grammar(
                at,
                self.tokens
                    .iter()
                    .find(|t| t.span.start == at)
                    .map(|t| t.lexeme.clone())
                    .unwrap_or_default(),
                format!("expression nesting exceeds {} levels", MAX_NESTING_DEPTH),
            ));
        }
        Ok(expr)
    }

    fn binary(&self, at: usize, op: BinaryOp, left: Expr, right: Expr) -> Result<Expr, SyntaxError> {
        let span = left.span.to(right.span);
        self.node(
            at,
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    // -- Expressions ---------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let expr = self.parse_or_expr();
        self.leave();
        expr
    }

    fn parse_or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and_expr()?;
        while self.peek() == &Token::Or {
            let at = self.advance().span.start;
            let right = self.parse_and_expr()?;
            left = self.binary(at, BinaryOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_not_expr()?;
        while self.peek() == &Token::And {
            let at = self.advance().span.start;
            let right = self.parse_not_expr()?;
            left = self.binary(at, BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == &Token::Not {
            let start = self.advance().span;
            self.enter()?;
            let operand = self.parse_not_expr();
            self.leave();
            let operand = operand?;
            let span = start.to(operand.span);
            return self.node(
                start.start,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_additive()?;
        while let Some(op) = comparison_op(self.peek()) {
            let at = self.advance().span.start;
            let right = self.parse_additive()?;
            left = self.binary(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            let at = self.advance().span.start;
            let right = self.parse_multiplicative()?;
            left = self.binary(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            let at = self.advance().span.start;
            let right = self.parse_unary()?;
            left = self.binary(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == &Token::Minus {
            let start = self.advance().span;
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            let operand = operand?;
            let span = start.to(operand.span);
            return self.node(
                start.start,
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            );
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let tok = self.cur().clone();
        match tok.token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Number(n)), tok.span))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Text(s)), tok.span))
            }
            Token::Date(d) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Date(d)), tok.span))
            }
            Token::True | Token::False => {
                self.advance();
                let b = tok.token == Token::True;
                Ok(Expr::new(ExprKind::Literal(Literal::Boolean(b)), tok.span))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                let close = self.expect(Token::RParen)?;
                // Parentheses widen the span but add no node.
                Ok(Expr::new(inner.kind, tok.span.to(close.span)))
            }
            Token::Function(function) => self.parse_call(function, tok.span),
            Token::Ident(name) => {
                self.advance();
                if self.peek() == &Token::LParen {
                    return Err(SyntaxError::grammar(
                        tok.span.start,
                        name.clone(),
                        format!("unknown function '{}'", name),
                    ));
                }
                if self.peek() == &Token::Dot {
                    self.advance();
                    let field = self.cur().clone();
                    let field_id = match field.token {
                        Token::Ident(f) => f,
                        // A field may share its name with a function.
                        Token::Function(f) => f.name().to_owned(),
                        _ => return Err(self.unexpected("field identifier")),
                    };
                    self.advance();
                    return Ok(Expr::new(
                        ExprKind::FieldReference(FieldRef {
                            entity: Some(name),
                            field_id,
                        }),
                        tok.span.to(field.span),
                    ));
                }
                Ok(Expr::new(
                    ExprKind::FieldReference(FieldRef {
                        entity: None,
                        field_id: name,
                    }),
                    tok.span,
                ))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_call(&mut self, function: Function, name_span: Span) -> Result<Expr, SyntaxError> {
        self.advance();
        if self.peek() != &Token::LParen {
            return Err(self.unexpected(&format!("'(' after function '{}'", function.name())));
        }
        self.advance();
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_expr()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        if self.peek() != &Token::RParen {
            return Err(self.unexpected("',' or ')'"));
        }
        let close = self.advance();
        let span = name_span.to(close.span);

        let spec = functions::lookup(function.name()).ok_or_else(|| {
            SyntaxError::grammar(
                name_span.start,
                function.name(),
                format!("unknown function '{}'", function.name()),
            )
        })?;
        if !spec.accepts(args.len()) {
            return Err(SyntaxError::grammar(
                name_span.start,
                function.name(),
                format!(
                    "function '{}' expects {} argument(s), got {}",
                    spec.name,
                    spec.arity_text(),
                    args.len()
                ),
            ));
        }

        if function == Function::IfElse {
            let mut it = args.into_iter();
            if let (Some(cond), Some(then_branch), Some(else_branch)) = (it.next(), it.next(), it.next())
            {
                return self.node(
                    name_span.start,
                    ExprKind::Conditional {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    span,
                );
            }
            return Err(SyntaxError::grammar(
                name_span.start,
                "if_else",
                "function 'if_else' expects 3 argument(s)",
            ));
        }
        self.node(name_span.start, ExprKind::Call { function, args }, span)
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    match token {
        Token::Eq => Some(BinaryOp::Eq),
        Token::Neq => Some(BinaryOp::Neq),
        Token::Lt => Some(BinaryOp::Lt),
        Token::Lte => Some(BinaryOp::Lte),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Gte => Some(BinaryOp::Gte),
        _ => None,
    }
}

/// Parse a token stream produced by [`lexer::lex`] into a single expression.
pub fn parse(tokens: &[Spanned]) -> Result<Expr, SyntaxError> {
    if tokens.is_empty() {
        return Err(SyntaxError::unexpected(0, "expression", "end of input"));
    }
    let mut p = Parser::new(tokens);
    let expr = p.parse_expr()?;
    if p.peek() != &Token::Eof {
        return Err(p.unexpected("end of input"));
    }
    Ok(expr)
}

/// Lex and parse formula source. Lexical errors are all reported; a grammar
/// error is reported alone.
pub fn parse_formula(src: &str) -> Result<Expr, Vec<SyntaxError>> {
    let tokens = lexer::lex(src)?;
    parse(&tokens).map_err(|e| vec![e])
}

/// A parsed formula kept by the caller for repeated evaluation.
///
/// The engine itself never caches; holding on to one of these is the
/// caller's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFormula {
    pub source: String,
    pub ast: Expr,
}

impl CompiledFormula {
    pub fn compile(src: &str) -> Result<Self, Vec<SyntaxError>> {
        Ok(CompiledFormula {
            source: src.to_owned(),
            ast: parse_formula(src)?,
        })
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
