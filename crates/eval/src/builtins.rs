//! Implementations of the whitelisted functions over evaluated arguments.
//!
//! `coalesce` and `if_else` are not here: the evaluator handles them before
//! their arguments are evaluated.

use formula_core::Function;
use rust_decimal::{Decimal, MathematicalOps};
use time::Date;

use crate::numeric;
use crate::types::{EvalError, Value};

/// Apply `function` to already evaluated arguments. Arity was checked by
/// the parser.
pub fn apply(function: Function, args: &[Value], as_of: Option<Date>) -> Result<Value, EvalError> {
    let name = function.name();
    let num = |i: usize| arg(args, i, name).and_then(|v| v.as_number(name));
    let text = |i: usize| arg(args, i, name).and_then(|v| v.as_text(name));

    let value = match function {
        Function::Abs => Value::Number(num(0)?.abs()),
        Function::Floor => Value::Number(num(0)?.floor()),
        Function::Ceil => Value::Number(num(0)?.ceil()),
        Function::Sqrt => Value::Number(sqrt(num(0)?)?),
        Function::Round => {
            let places = if args.len() > 1 { num(1)? } else { Decimal::ZERO };
            Value::Number(numeric::round(num(0)?, places)?)
        }
        Function::Pow => Value::Number(pow(num(0)?, num(1)?)?),
        Function::Min | Function::Max => {
            let mut best = num(0)?;
            for i in 1..args.len() {
                let n = num(i)?;
                let better = if function == Function::Min { n < best } else { n > best };
                if better {
                    best = n;
                }
            }
            Value::Number(best)
        }
        Function::Sum => {
            let mut total = Decimal::ZERO;
            for i in 0..args.len() {
                total = total.checked_add(num(i)?).ok_or_else(|| EvalError::Overflow {
                    message: "sum".to_owned(),
                })?;
            }
            Value::Number(total)
        }

        Function::Upper => Value::Text(text(0)?.to_uppercase()),
        Function::Lower => Value::Text(text(0)?.to_lowercase()),
        Function::Trim => Value::Text(text(0)?.trim().to_owned()),
        Function::Concat => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(text(i)?);
            }
            Value::Text(out)
        }
        Function::Length => Value::Number(Decimal::from(text(0)?.chars().count())),
        Function::Left => {
            let n = numeric::to_count(name, num(1)?)?;
            Value::Text(text(0)?.chars().take(n).collect())
        }
        Function::Right => {
            let s = text(0)?;
            let n = numeric::to_count(name, num(1)?)?;
            let skip = s.chars().count().saturating_sub(n);
            Value::Text(s.chars().skip(skip).collect())
        }
        Function::Mid => {
            let start = numeric::to_count(name, num(1)?)?;
            if start == 0 {
                return Err(EvalError::Domain {
                    function: name,
                    message: "start position is 1-based".to_owned(),
                });
            }
            let len = numeric::to_count(name, num(2)?)?;
            Value::Text(text(0)?.chars().skip(start - 1).take(len).collect())
        }

        Function::IsEmpty => Value::Boolean(arg(args, 0, name)?.is_empty()),
        Function::Today => Value::Date(as_of.ok_or(EvalError::MissingReferenceDate)?),
        Function::Year => {
            let d = arg(args, 0, name)?.as_date(name)?;
            Value::Number(Decimal::from(d.year()))
        }
        Function::Month => {
            let d = arg(args, 0, name)?.as_date(name)?;
            Value::Number(Decimal::from(u8::from(d.month())))
        }
        Function::Day => {
            let d = arg(args, 0, name)?.as_date(name)?;
            Value::Number(Decimal::from(d.day()))
        }

        Function::Coalesce | Function::IfElse => {
            return Err(EvalError::Domain {
                function: name,
                message: "only evaluated lazily, never over evaluated arguments".to_owned(),
            })
        }
    };
    Ok(value)
}

fn arg<'v>(args: &'v [Value], index: usize, function: &'static str) -> Result<&'v Value, EvalError> {
    args.get(index).ok_or_else(|| EvalError::Domain {
        function,
        message: format!("missing argument {}", index + 1),
    })
}

fn sqrt(n: Decimal) -> Result<Decimal, EvalError> {
    if n.is_sign_negative() && !n.is_zero() {
        return Err(EvalError::Domain {
            function: "sqrt",
            message: format!("square root of negative number {}", n),
        });
    }
    n.sqrt().ok_or_else(|| EvalError::Overflow {
        message: format!("sqrt({})", n),
    })
}

fn pow(base: Decimal, exponent: Decimal) -> Result<Decimal, EvalError> {
    let overflow = || EvalError::Overflow {
        message: format!("pow({}, {})", base, exponent),
    };
    if base.is_zero() && exponent.is_sign_negative() && !exponent.is_zero() {
        return Err(EvalError::DivisionByZero);
    }
    let result = match numeric::as_integer(exponent) {
        Some(e) => base.checked_powi(e),
        None if base.is_sign_negative() && !base.is_zero() => {
            return Err(EvalError::Domain {
                function: "pow",
                message: format!("fractional power {} of negative base {}", exponent, base),
            })
        }
        None => base.checked_powd(exponent),
    };
    match result {
        Some(value) => Ok(value),
        // Too small for the decimal scale: rounds to zero, like division.
        None if shrinks(base, exponent) => Ok(Decimal::ZERO),
        None => Err(overflow()),
    }
}

/// Whether `|base ^ exponent| < 1`.
fn shrinks(base: Decimal, exponent: Decimal) -> bool {
    let magnitude = base.abs();
    if exponent.is_zero() {
        return false;
    }
    if exponent.is_sign_positive() {
        magnitude < Decimal::ONE
    } else {
        magnitude > Decimal::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use time::macros::date;

    fn n(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    fn t(s: &str) -> Value {
        Value::Text(s.to_owned())
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(apply(Function::Abs, &[n("-3.5")], None).unwrap(), n("3.5"));
        assert_eq!(apply(Function::Round, &[n("2.345"), n("2")], None).unwrap(), n("2.35"));
        assert_eq!(apply(Function::Round, &[n("2.5")], None).unwrap(), n("3"));
        assert_eq!(apply(Function::Pow, &[n("2"), n("10")], None).unwrap(), n("1024"));
        assert_eq!(apply(Function::Sqrt, &[n("16")], None).unwrap(), n("4"));
        assert_eq!(
            apply(Function::Min, &[n("3"), n("-1"), n("2")], None).unwrap(),
            n("-1")
        );
        assert_eq!(
            apply(Function::Sum, &[n("1.5"), n("2.5"), n("1")], None).unwrap(),
            n("5")
        );
        assert_eq!(apply(Function::Floor, &[n("-1.5")], None).unwrap(), n("-2"));
    }

    #[test]
    fn pow_underflow_rounds_to_zero() {
        assert_eq!(apply(Function::Pow, &[n("2"), n("-100")], None).unwrap(), n("0"));
        assert_eq!(apply(Function::Pow, &[n("0.0001"), n("99.5")], None).unwrap(), n("0"));
        assert!(matches!(
            apply(Function::Pow, &[n("0.5"), n("-100")], None),
            Err(EvalError::Overflow { .. })
        ));
        assert!(matches!(
            apply(Function::Pow, &[n("10"), n("40")], None),
            Err(EvalError::Overflow { .. })
        ));
    }

    #[test]
    fn domain_errors() {
        assert!(matches!(
            apply(Function::Sqrt, &[n("-1")], None),
            Err(EvalError::Domain { function: "sqrt", .. })
        ));
        assert!(matches!(
            apply(Function::Pow, &[n("-8"), n("0.5")], None),
            Err(EvalError::Domain { .. })
        ));
        assert_eq!(
            apply(Function::Pow, &[n("0"), n("-1")], None),
            Err(EvalError::DivisionByZero)
        );
        assert!(apply(Function::Left, &[t("abc"), n("-1")], None).is_err());
        assert!(apply(Function::Mid, &[t("abc"), n("0"), n("1")], None).is_err());
    }

    #[test]
    fn text_functions_count_characters() {
        assert_eq!(apply(Function::Length, &[t("héllo")], None).unwrap(), n("5"));
        assert_eq!(apply(Function::Left, &[t("héllo"), n("2")], None).unwrap(), t("hé"));
        assert_eq!(apply(Function::Right, &[t("hello"), n("9")], None).unwrap(), t("hello"));
        assert_eq!(
            apply(Function::Mid, &[t("hello"), n("2"), n("3")], None).unwrap(),
            t("ell")
        );
        assert_eq!(
            apply(Function::Concat, &[t("a"), t("b"), t("c")], None).unwrap(),
            t("abc")
        );
        assert_eq!(apply(Function::Trim, &[t("  x ")], None).unwrap(), t("x"));
    }

    #[test]
    fn date_functions() {
        let d = Value::Date(date!(2024 - 03 - 09));
        assert_eq!(apply(Function::Year, &[d.clone()], None).unwrap(), n("2024"));
        assert_eq!(apply(Function::Month, &[d.clone()], None).unwrap(), n("3"));
        assert_eq!(apply(Function::Day, &[d], None).unwrap(), n("9"));
        assert_eq!(
            apply(Function::Today, &[], Some(date!(2024 - 01 - 01))).unwrap(),
            Value::Date(date!(2024 - 01 - 01))
        );
        assert_eq!(
            apply(Function::Today, &[], None),
            Err(EvalError::MissingReferenceDate)
        );
    }

    #[test]
    fn empty_arguments_fail_except_for_emptiness_checks() {
        assert!(matches!(
            apply(Function::Upper, &[Value::Empty], None),
            Err(EvalError::EmptyOperand { .. })
        ));
        assert_eq!(
            apply(Function::IsEmpty, &[Value::Empty], None).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn lazy_functions_are_not_applied_eagerly() {
        assert!(matches!(
            apply(Function::Coalesce, &[Value::Empty, n("2")], None),
            Err(EvalError::Domain { function: "coalesce", .. })
        ));
        assert!(matches!(
            apply(Function::IfElse, &[Value::Boolean(true), n("1"), n("2")], None),
            Err(EvalError::Domain { function: "if_else", .. })
        ));
    }
}
