//! Numeric model and comparisons.
//!
//! All NUMBER arithmetic uses `rust_decimal::Decimal` with checked
//! operations; an overflow is an evaluation failure, never a wrapped or
//! saturated value. No `f64` anywhere in the evaluation path.

use std::cmp::Ordering;

use formula_core::BinaryOp;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{EvalError, Value};

/// Rounding used by `round()`: halves round away from zero.
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Largest number of decimal places `round()` accepts.
pub const MAX_SCALE: u32 = 28;

/// Apply an arithmetic operator to two numbers.
pub fn arithmetic(op: BinaryOp, left: Decimal, right: Decimal) -> Result<Decimal, EvalError> {
    let overflow = || EvalError::Overflow {
        message: format!("{} {} {}", left, op.symbol(), right),
    };
    match op {
        BinaryOp::Add => left.checked_add(right).ok_or_else(overflow),
        BinaryOp::Sub => left.checked_sub(right).ok_or_else(overflow),
        BinaryOp::Mul => left.checked_mul(right).ok_or_else(overflow),
        BinaryOp::Div => {
            if right.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            left.checked_div(right).ok_or_else(overflow)
        }
        BinaryOp::Rem => {
            if right.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            left.checked_rem(right).ok_or_else(overflow)
        }
        other => Err(EvalError::TypeMismatch {
            context: format!("operator '{}'", other.symbol()),
            expected: "an arithmetic operator".to_owned(),
            found: "a non-arithmetic operator".to_owned(),
        }),
    }
}

/// Evaluate a comparison operator.
///
/// Equality is defined for any two values of the same type, and for
/// `Empty` against anything (equal only to another `Empty`). Ordering is
/// defined for NUMBER, TEXT (code point order) and DATE.
pub fn compare_values(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    let context = format!("operator '{}'", op.symbol());
    if op.is_equality() {
        let equal = match (left, right) {
            (Value::Empty, _) | (_, Value::Empty) => left == right,
            (Value::Number(l), Value::Number(r)) => l == r,
            (Value::Text(l), Value::Text(r)) => l == r,
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::Date(l), Value::Date(r)) => l == r,
            (l, r) => {
                return Err(EvalError::TypeMismatch {
                    context,
                    expected: l.type_name().to_owned(),
                    found: r.type_name().to_owned(),
                })
            }
        };
        return Ok(if op == BinaryOp::Eq { equal } else { !equal });
    }

    let ordering = match (left, right) {
        (Value::Empty, _) | (_, Value::Empty) => {
            return Err(EvalError::EmptyOperand { context });
        }
        (Value::Number(l), Value::Number(r)) => l.cmp(r),
        (Value::Text(l), Value::Text(r)) => l.as_str().cmp(r.as_str()),
        (Value::Date(l), Value::Date(r)) => l.cmp(r),
        (Value::Boolean(_), Value::Boolean(_)) => {
            return Err(EvalError::TypeMismatch {
                context,
                expected: "NUMBER, TEXT or DATE".to_owned(),
                found: "BOOLEAN".to_owned(),
            });
        }
        (l, r) => {
            return Err(EvalError::TypeMismatch {
                context,
                expected: l.type_name().to_owned(),
                found: r.type_name().to_owned(),
            })
        }
    };
    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Lte => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Round to `places` decimal places.
pub fn round(value: Decimal, places: Decimal) -> Result<Decimal, EvalError> {
    let places = to_count("round", places)?;
    if places > MAX_SCALE as usize {
        return Err(EvalError::Domain {
            function: "round",
            message: format!("at most {} decimal places are supported", MAX_SCALE),
        });
    }
    Ok(value.round_dp_with_strategy(places as u32, ROUNDING))
}

/// Interpret a NUMBER argument as a non-negative whole count.
pub fn to_count(function: &'static str, n: Decimal) -> Result<usize, EvalError> {
    if n.is_sign_negative() && !n.is_zero() {
        return Err(EvalError::Domain {
            function,
            message: format!("expected a non-negative whole number, got {}", n),
        });
    }
    if !n.fract().is_zero() {
        return Err(EvalError::Domain {
            function,
            message: format!("expected a whole number, got {}", n),
        });
    }
    n.to_usize().ok_or_else(|| EvalError::Domain {
        function,
        message: format!("{} is too large", n),
    })
}

/// Integral exponent as `i64`, if the number is whole.
pub fn as_integer(n: Decimal) -> Option<i64> {
    if n.fract().is_zero() {
        n.to_i64()
    } else {
        None
    }
}
