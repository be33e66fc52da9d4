//! Bottom-up type inference over the formula AST.
//!
//! Inference is a pure function of the tree and the schema snapshot; the
//! formula is never executed. Every type error is collected. An operand of
//! type UNKNOWN (an unresolved field, or a sub-expression that already
//! failed) is accepted everywhere so one mistake is reported once.

use crate::ast::{BinaryOp, Expr, ExprKind, Literal, Span, UnaryOp};
use crate::error::TypeError;
use crate::functions::Function;
use crate::schema::{FormulaType, SchemaSnapshot};

/// Outcome of type checking one formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCheck {
    pub inferred: FormulaType,
    pub errors: Vec<TypeError>,
}

pub fn type_check(expr: &Expr, schema: &SchemaSnapshot) -> TypeCheck {
    let mut checker = TypeChecker {
        schema,
        errors: Vec::new(),
    };
    let inferred = checker.infer(expr);
    TypeCheck {
        inferred,
        errors: checker.errors,
    }
}

struct TypeChecker<'a> {
    schema: &'a SchemaSnapshot,
    errors: Vec<TypeError>,
}

fn fits(actual: FormulaType, expected: FormulaType) -> bool {
    actual == expected || actual.is_unknown()
}

impl TypeChecker<'_> {
    fn infer(&mut self, expr: &Expr) -> FormulaType {
        match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Number(_) => FormulaType::Number,
                Literal::Text(_) => FormulaType::Text,
                Literal::Boolean(_) => FormulaType::Boolean,
                Literal::Date(_) => FormulaType::Date,
            },
            ExprKind::FieldReference(r) => {
                let same_entity = r
                    .entity
                    .as_deref()
                    .map_or(true, |e| e == self.schema.entity_id);
                if !same_entity {
                    return FormulaType::Unknown;
                }
                self.schema
                    .field_type(&r.field_id)
                    .unwrap_or(FormulaType::Unknown)
            }
            ExprKind::Unary { op, operand } => {
                let t = self.infer(operand);
                let expected = match op {
                    UnaryOp::Neg => FormulaType::Number,
                    UnaryOp::Not => FormulaType::Boolean,
                };
                if !fits(t, expected) {
                    self.errors.push(TypeError::mismatch(
                        operand.span,
                        expected.to_string(),
                        t,
                        &format!("operator '{}'", op),
                    ));
                }
                expected
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.infer(left);
                let r = self.infer(right);
                self.check_binary(*op, l, r, expr.span)
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.infer(cond);
                if !fits(c, FormulaType::Boolean) {
                    self.errors.push(TypeError::mismatch(
                        cond.span,
                        "BOOLEAN",
                        c,
                        "if_else condition",
                    ));
                }
                let a = self.infer(then_branch);
                let b = self.infer(else_branch);
                self.common_type(&[(a, then_branch.span), (b, else_branch.span)], "if_else")
            }
            ExprKind::Call { function, args } => self.check_call(*function, args),
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        l: FormulaType,
        r: FormulaType,
        span: Span,
    ) -> FormulaType {
        if op.is_arithmetic() {
            if !fits(l, FormulaType::Number) || !fits(r, FormulaType::Number) {
                self.errors.push(TypeError {
                    span,
                    expected: "NUMBER and NUMBER".to_owned(),
                    found: format!("{} and {}", l, r),
                    message: format!(
                        "operator '{}' requires NUMBER operands, got {} and {}",
                        op, l, r
                    ),
                });
            }
            return FormulaType::Number;
        }
        if op.is_logical() {
            if !fits(l, FormulaType::Boolean) || !fits(r, FormulaType::Boolean) {
                self.errors.push(TypeError {
                    span,
                    expected: "BOOLEAN and BOOLEAN".to_owned(),
                    found: format!("{} and {}", l, r),
                    message: format!(
                        "operator '{}' requires BOOLEAN operands, got {} and {}",
                        op, l, r
                    ),
                });
            }
            return FormulaType::Boolean;
        }
        // Comparison
        if l.is_unknown() || r.is_unknown() {
            return FormulaType::Boolean;
        }
        if l != r {
            self.errors.push(TypeError {
                span,
                expected: format!("{} and {}", l, l),
                found: format!("{} and {}", l, r),
                message: format!("cannot compare {} with {} using '{}'", l, r, op),
            });
        } else if !op.is_equality() && !l.is_ordered() {
            self.errors.push(TypeError {
                span,
                expected: "NUMBER, TEXT or DATE".to_owned(),
                found: l.to_string(),
                message: format!("operator '{}' is not defined for {}", op, l),
            });
        }
        FormulaType::Boolean
    }

    /// The shared type of several branches; a mismatch is an error, never a
    /// coercion.
    fn common_type(&mut self, branches: &[(FormulaType, Span)], context: &str) -> FormulaType {
        let mut common = FormulaType::Unknown;
        let mut common_span: Option<Span> = None;
        for &(t, span) in branches {
            if t.is_unknown() {
                continue;
            }
            match common_span {
                None => {
                    common = t;
                    common_span = Some(span);
                }
                Some(first) if t != common => {
                    self.errors.push(TypeError {
                        span: first.to(span),
                        expected: common.to_string(),
                        found: t.to_string(),
                        message: format!(
                            "{} branches have different types: {} and {}",
                            context, common, t
                        ),
                    });
                    return FormulaType::Unknown;
                }
                Some(_) => {}
            }
        }
        common
    }

    fn expect_args(
        &mut self,
        function: Function,
        args: &[(FormulaType, Span)],
        expected: &[FormulaType],
    ) {
        for (i, &(t, span)) in args.iter().enumerate() {
            // Variadic functions repeat their last parameter type.
            let want = expected
                .get(i)
                .or(expected.last())
                .copied()
                .unwrap_or(FormulaType::Unknown);
            if !fits(t, want) && !want.is_unknown() {
                self.errors.push(TypeError::mismatch(
                    span,
                    want.to_string(),
                    t,
                    &format!("function '{}' argument {}", function.name(), i + 1),
                ));
            }
        }
    }

    fn check_call(&mut self, function: Function, args: &[Expr]) -> FormulaType {
        use FormulaType::{Boolean, Date, Number, Text, Unknown};

        let typed: Vec<(FormulaType, Span)> =
            args.iter().map(|a| (self.infer(a), a.span)).collect();
        match function {
            Function::Abs
            | Function::Min
            | Function::Max
            | Function::Round
            | Function::Sum
            | Function::Pow
            | Function::Sqrt
            | Function::Floor
            | Function::Ceil => {
                self.expect_args(function, &typed, &[Number]);
                Number
            }
            Function::Upper | Function::Lower | Function::Trim | Function::Concat => {
                self.expect_args(function, &typed, &[Text]);
                Text
            }
            Function::Length => {
                self.expect_args(function, &typed, &[Text]);
                Number
            }
            Function::Left | Function::Right => {
                self.expect_args(function, &typed, &[Text, Number]);
                Text
            }
            Function::Mid => {
                self.expect_args(function, &typed, &[Text, Number, Number]);
                Text
            }
            Function::IsEmpty => Boolean,
            Function::Coalesce => self.common_type(&typed, "coalesce"),
            Function::Today => Date,
            Function::Year | Function::Month | Function::Day => {
                self.expect_args(function, &typed, &[Date]);
                Number
            }
            // Lowered to a Conditional node by the parser.
            Function::IfElse => Unknown,
        }
    }
}
