//! The fixed function whitelist.
//!
//! Static immutable data: functions cannot be registered at runtime, and
//! nothing with side effects or non-determinism is listed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Abs,
    Min,
    Max,
    Round,
    Sum,
    Pow,
    Sqrt,
    Floor,
    Ceil,
    Upper,
    Lower,
    Trim,
    Concat,
    Length,
    Left,
    Right,
    Mid,
    IfElse,
    IsEmpty,
    Coalesce,
    Today,
    Year,
    Month,
    Day,
}

/// Name and accepted argument count of a whitelisted function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub function: Function,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
}

const fn spec(
    name: &'static str,
    function: Function,
    min_args: usize,
    max_args: Option<usize>,
) -> FunctionSpec {
    FunctionSpec {
        name,
        function,
        min_args,
        max_args,
    }
}

pub static FUNCTIONS: &[FunctionSpec] = &[
    spec("abs", Function::Abs, 1, Some(1)),
    spec("min", Function::Min, 1, None),
    spec("max", Function::Max, 1, None),
    spec("round", Function::Round, 1, Some(2)),
    spec("sum", Function::Sum, 1, None),
    spec("pow", Function::Pow, 2, Some(2)),
    spec("sqrt", Function::Sqrt, 1, Some(1)),
    spec("floor", Function::Floor, 1, Some(1)),
    spec("ceil", Function::Ceil, 1, Some(1)),
    spec("upper", Function::Upper, 1, Some(1)),
    spec("lower", Function::Lower, 1, Some(1)),
    spec("trim", Function::Trim, 1, Some(1)),
    spec("concat", Function::Concat, 1, None),
    spec("length", Function::Length, 1, Some(1)),
    spec("left", Function::Left, 2, Some(2)),
    spec("right", Function::Right, 2, Some(2)),
    spec("mid", Function::Mid, 3, Some(3)),
    spec("if_else", Function::IfElse, 3, Some(3)),
    spec("is_empty", Function::IsEmpty, 1, Some(1)),
    spec("coalesce", Function::Coalesce, 1, None),
    spec("today", Function::Today, 0, Some(0)),
    spec("year", Function::Year, 1, Some(1)),
    spec("month", Function::Month, 1, Some(1)),
    spec("day", Function::Day, 1, Some(1)),
];

/// Look up a whitelisted function by its source name.
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::Round => "round",
            Function::Sum => "sum",
            Function::Pow => "pow",
            Function::Sqrt => "sqrt",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Upper => "upper",
            Function::Lower => "lower",
            Function::Trim => "trim",
            Function::Concat => "concat",
            Function::Length => "length",
            Function::Left => "left",
            Function::Right => "right",
            Function::Mid => "mid",
            Function::IfElse => "if_else",
            Function::IsEmpty => "is_empty",
            Function::Coalesce => "coalesce",
            Function::Today => "today",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
        }
    }
}

impl FunctionSpec {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Human-readable arity for diagnostics, e.g. "1 to 2" or "at least 1".
    pub fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}
