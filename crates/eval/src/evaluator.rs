//! Formula evaluator.
//!
//! A pure walk over the AST: values come only from the evaluation
//! context, the reference date for `today()` comes from the context too,
//! and nothing is cached between calls. `and`, `or`, `if_else` and
//! `coalesce` evaluate lazily, so an unread branch can never fail.

use formula_core::{BinaryOp, CompiledFormula, Expr, ExprKind, Function, Literal, UnaryOp};

use crate::builtins;
use crate::limits::Deadline;
use crate::numeric;
use crate::provenance::ReadCollector;
use crate::types::{EvalError, EvaluationContext, EvaluationResult, Value};

/// Evaluate `expr` within a budget of `budget_ms` milliseconds.
pub fn evaluate(expr: &Expr, ctx: &EvaluationContext<'_>, budget_ms: u64) -> Result<Value, EvalError> {
    let mut collector = ReadCollector::new();
    eval_expr(expr, ctx, &Deadline::after_ms(budget_ms), &mut collector)
}

/// Evaluate a compiled formula and package the outcome as a DTO.
pub fn evaluate_formula(
    formula: &CompiledFormula,
    ctx: &EvaluationContext<'_>,
    budget_ms: u64,
) -> EvaluationResult {
    let mut collector = ReadCollector::new();
    let outcome = eval_expr(
        &formula.ast,
        ctx,
        &Deadline::after_ms(budget_ms),
        &mut collector,
    );
    if let Err(e) = &outcome {
        tracing::debug!(
            entity = ctx.entity_id,
            field = ctx.field_id,
            formula = %formula.source,
            error = %e,
            "formula evaluation failed"
        );
    }
    EvaluationResult::from_outcome(outcome, collector.into_fields())
}

/// Evaluate against an existing deadline, recording field reads.
pub fn eval_expr(
    expr: &Expr,
    ctx: &EvaluationContext<'_>,
    deadline: &Deadline,
    collector: &mut ReadCollector,
) -> Result<Value, EvalError> {
    deadline.check()?;
    match &expr.kind {
        ExprKind::Literal(lit) => Ok(match lit {
            Literal::Number(n) => Value::Number(*n),
            Literal::Text(s) => Value::Text(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Date(d) => Value::Date(*d),
        }),

        ExprKind::FieldReference(r) => {
            let foreign = r.entity.as_deref().is_some_and(|e| e != ctx.entity_id);
            if foreign {
                return Err(EvalError::UnresolvedReference {
                    field_id: r.to_string(),
                });
            }
            collector.record_field(&r.field_id);
            ctx.values
                .get(&r.field_id)
                .cloned()
                .ok_or_else(|| EvalError::UnresolvedReference {
                    field_id: r.field_id.clone(),
                })
        }

        ExprKind::Unary { op, operand } => {
            let value = eval_expr(operand, ctx, deadline, collector)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-value.as_number("unary '-'")?)),
                UnaryOp::Not => Ok(Value::Boolean(!value.as_bool("'not'")?)),
            }
        }

        ExprKind::Binary { op, left, right } => match op {
            BinaryOp::And | BinaryOp::Or => {
                let context = format!("'{}'", op.symbol());
                let l = eval_expr(left, ctx, deadline, collector)?.as_bool(&context)?;
                // Short-circuit: the right operand is only read when needed.
                if (*op == BinaryOp::And && !l) || (*op == BinaryOp::Or && l) {
                    return Ok(Value::Boolean(l));
                }
                let r = eval_expr(right, ctx, deadline, collector)?.as_bool(&context)?;
                Ok(Value::Boolean(r))
            }
            op if op.is_comparison() => {
                let l = eval_expr(left, ctx, deadline, collector)?;
                let r = eval_expr(right, ctx, deadline, collector)?;
                numeric::compare_values(*op, &l, &r).map(Value::Boolean)
            }
            op => {
                let context = format!("operator '{}'", op.symbol());
                let l = eval_expr(left, ctx, deadline, collector)?.as_number(&context)?;
                let r = eval_expr(right, ctx, deadline, collector)?.as_number(&context)?;
                numeric::arithmetic(*op, l, r).map(Value::Number)
            }
        },

        ExprKind::Conditional {
            cond,
            then_branch,
            else_branch,
        } => {
            let c = eval_expr(cond, ctx, deadline, collector)?.as_bool("if_else")?;
            let branch = if c { then_branch } else { else_branch };
            eval_expr(branch, ctx, deadline, collector)
        }

        ExprKind::Call {
            function: Function::Coalesce,
            args,
        } => {
            for arg in args {
                let value = eval_expr(arg, ctx, deadline, collector)?;
                if !value.is_empty() {
                    return Ok(value);
                }
            }
            Ok(Value::Empty)
        }

        ExprKind::Call { function, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, ctx, deadline, collector)?);
            }
            builtins::apply(*function, &values, ctx.as_of)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuntimeValues;
    use formula_core::parse_formula;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use time::macros::date;

    fn n(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    fn values() -> RuntimeValues {
        RuntimeValues::new()
            .with("qty", n("4"))
            .with("price", n("2.50"))
            .with("name", Value::Text("Widget".into()))
            .with("note", Value::Empty)
            .with("due", Value::Date(date!(2024 - 06 - 30)))
    }

    fn eval(src: &str) -> Result<Value, EvalError> {
        let expr = parse_formula(src).expect("parses");
        let values = values();
        let ctx = EvaluationContext::new("order", "out", &values).with_as_of(date!(2024 - 06 - 01));
        evaluate(&expr, &ctx, 1000)
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("10 + 5").unwrap(), n("15"));
        assert_eq!(eval("qty * price + 1").unwrap(), n("11"));
        assert_eq!(eval("-(qty - 6) * 2").unwrap(), n("4"));
        assert_eq!(eval("10 % 4").unwrap(), n("2"));
    }

    #[test]
    fn logic_short_circuits() {
        assert_eq!(eval("qty > 10 and missing > 1").unwrap(), Value::Boolean(false));
        assert_eq!(eval("qty > 1 or missing > 1").unwrap(), Value::Boolean(true));
        assert!(matches!(
            eval("qty > 1 and missing > 1"),
            Err(EvalError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn conditional_evaluates_one_branch() {
        assert_eq!(eval("if_else(qty > 1, 'bulk', 1 / 0)").unwrap(), Value::Text("bulk".into()));
        assert_eq!(eval("if_else(qty > 9, 1 / 0, 7)").unwrap(), n("7"));
    }

    #[test]
    fn failures_are_explicit() {
        assert_eq!(eval("qty / 0"), Err(EvalError::DivisionByZero));
        assert!(matches!(eval("sqrt(0 - 1)"), Err(EvalError::Domain { .. })));
        assert!(matches!(eval("name + 1"), Err(EvalError::TypeMismatch { .. })));
        assert!(matches!(eval("note + 1"), Err(EvalError::EmptyOperand { .. })));
        assert!(matches!(
            eval("customer.qty"),
            Err(EvalError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn empty_handling() {
        assert_eq!(eval("is_empty(note)").unwrap(), Value::Boolean(true));
        assert_eq!(eval("coalesce(note, name)").unwrap(), Value::Text("Widget".into()));
        assert_eq!(eval("note == note").unwrap(), Value::Boolean(true));
        assert!(eval("coalesce(note, missing, 1)").is_err());
        assert_eq!(eval("coalesce(name, missing)").unwrap(), Value::Text("Widget".into()));
    }

    #[test]
    fn dates_and_today() {
        assert_eq!(eval("due > today()").unwrap(), Value::Boolean(true));
        assert_eq!(eval("year(due) * 100 + month(due)").unwrap(), n("202406"));
        assert_eq!(eval("due == #2024-06-30#").unwrap(), Value::Boolean(true));

        let expr = parse_formula("today()").unwrap();
        let values = values();
        let ctx = EvaluationContext::new("order", "out", &values);
        assert_eq!(evaluate(&expr, &ctx, 1000), Err(EvalError::MissingReferenceDate));
    }

    #[test]
    fn zero_budget_times_out() {
        let expr = parse_formula("1 + 1").unwrap();
        let values = values();
        let ctx = EvaluationContext::new("order", "out", &values);
        assert_eq!(evaluate(&expr, &ctx, 0), Err(EvalError::Timeout { budget_ms: 0 }));
    }

    #[test]
    fn result_dto_reports_reads() {
        let formula = CompiledFormula::compile("if_else(qty > 1, price, name)").unwrap();
        let values = values();
        let ctx = EvaluationContext::new("order", "out", &values);
        let result = evaluate_formula(&formula, &ctx, 1000);
        assert!(result.success);
        assert_eq!(result.value, Some(n("2.5")));
        assert_eq!(result.fields_read, vec!["qty", "price"]);

        let failed = evaluate_formula(&CompiledFormula::compile("qty / 0").unwrap(), &ctx, 1000);
        assert!(!failed.success);
        assert_eq!(failed.failure_reason.as_deref(), Some("division by zero"));
    }
}
