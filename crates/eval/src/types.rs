//! Runtime values, evaluation errors and the per-call evaluation context.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use formula_core::{FormulaType, SchemaSnapshot, SyntaxError};
use rust_decimal::Decimal;
use serde::ser::{Serialize, Serializer};
use time::Date;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Evaluation failure. Evaluation never yields a partial value: any of
/// these aborts the whole formula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// A referenced field has no runtime value at all.
    #[error("field '{field_id}' has no runtime value")]
    UnresolvedReference { field_id: String },
    #[error("{context} expects {expected}, got {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },
    /// An operator other than equality was applied to an empty value.
    #[error("{context} applied to an empty value")]
    EmptyOperand { context: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{function}: {message}")]
    Domain {
        function: &'static str,
        message: String,
    },
    #[error("numeric overflow: {message}")]
    Overflow { message: String },
    #[error("evaluation exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },
    #[error("control chain from rule '{rule_id}' exceeds depth {max_depth}")]
    ChainDepthExceeded { rule_id: String, max_depth: usize },
    #[error("cyclic dependency: {}", cycles.join("; "))]
    CyclicDependency { cycles: Vec<String> },
    #[error("today() requires a reference date")]
    MissingReferenceDate,
    #[error("formula does not parse: {}", first_message(errors))]
    Syntax { errors: Vec<SyntaxError> },
    #[error("invalid value for field '{field_id}': {message}")]
    InvalidInput { field_id: String, message: String },
    /// Failure of a specific field's or rule's formula, wrapping the cause.
    #[error("{subject} (formula `{formula}`): {source}")]
    Blocking {
        subject: String,
        formula: String,
        #[source]
        source: Box<EvalError>,
    },
}

fn first_message(errors: &[SyntaxError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no diagnostics".to_owned())
}

impl EvalError {
    pub(crate) fn mismatch(context: impl Into<String>, expected: &str, found: &Value) -> Self {
        EvalError::TypeMismatch {
            context: context.into(),
            expected: expected.to_owned(),
            found: found.type_name().to_owned(),
        }
    }

    pub(crate) fn blocking(subject: String, formula: &str, source: EvalError) -> Self {
        EvalError::Blocking {
            subject,
            formula: formula.to_owned(),
            source: Box::new(source),
        }
    }

    /// The innermost cause, unwrapping field and rule wrappers.
    pub fn root_cause(&self) -> &EvalError {
        match self {
            EvalError::Blocking { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// ──────────────────────────────────────────────
// Values
// ──────────────────────────────────────────────

/// A runtime value. `Empty` is a present field with no content; it is
/// distinct from a field with no runtime value at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Date(Date),
    Empty,
}

impl Value {
    /// Formula type of a non-empty value.
    pub fn formula_type(&self) -> Option<FormulaType> {
        match self {
            Value::Number(_) => Some(FormulaType::Number),
            Value::Text(_) => Some(FormulaType::Text),
            Value::Boolean(_) => Some(FormulaType::Boolean),
            Value::Date(_) => Some(FormulaType::Date),
            Value::Empty => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "NUMBER",
            Value::Text(_) => "TEXT",
            Value::Boolean(_) => "BOOLEAN",
            Value::Date(_) => "DATE",
            Value::Empty => "EMPTY",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn as_number(&self, context: &str) -> Result<Decimal, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Empty => Err(EvalError::EmptyOperand {
                context: context.to_owned(),
            }),
            other => Err(EvalError::mismatch(context, "NUMBER", other)),
        }
    }

    pub fn as_text(&self, context: &str) -> Result<&str, EvalError> {
        match self {
            Value::Text(s) => Ok(s),
            Value::Empty => Err(EvalError::EmptyOperand {
                context: context.to_owned(),
            }),
            other => Err(EvalError::mismatch(context, "TEXT", other)),
        }
    }

    pub fn as_bool(&self, context: &str) -> Result<bool, EvalError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Empty => Err(EvalError::EmptyOperand {
                context: context.to_owned(),
            }),
            other => Err(EvalError::mismatch(context, "BOOLEAN", other)),
        }
    }

    pub fn as_date(&self, context: &str) -> Result<Date, EvalError> {
        match self {
            Value::Date(d) => Ok(*d),
            Value::Empty => Err(EvalError::EmptyOperand {
                context: context.to_owned(),
            }),
            other => Err(EvalError::mismatch(context, "DATE", other)),
        }
    }

    /// Convert a JSON value into a runtime value of the declared type.
    ///
    /// `null` is `Empty` for every type. Numbers are accepted as JSON
    /// numbers or decimal strings; dates as ISO `YYYY-MM-DD` strings.
    pub fn from_json(
        field_id: &str,
        json: &serde_json::Value,
        declared: FormulaType,
    ) -> Result<Value, EvalError> {
        let invalid = |message: String| EvalError::InvalidInput {
            field_id: field_id.to_owned(),
            message,
        };
        if json.is_null() {
            return Ok(Value::Empty);
        }
        match declared {
            FormulaType::Number => {
                let text = match json {
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    other => return Err(invalid(format!("expected a number, got {}", other))),
                };
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(Value::Number)
                    .map_err(|e| invalid(format!("'{}' is not a decimal: {}", text, e)))
            }
            FormulaType::Text => json
                .as_str()
                .map(|s| Value::Text(s.to_owned()))
                .ok_or_else(|| invalid(format!("expected a string, got {}", json))),
            FormulaType::Boolean => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| invalid(format!("expected a boolean, got {}", json))),
            FormulaType::Date => {
                let text = json
                    .as_str()
                    .ok_or_else(|| invalid(format!("expected a date string, got {}", json)))?;
                formula_core::lexer::parse_iso_date(text)
                    .map(Value::Date)
                    .ok_or_else(|| invalid(format!("'{}' is not a YYYY-MM-DD date", text)))
            }
            FormulaType::Unknown => Err(invalid("field has no declared type".to_owned())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n.normalize()),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d),
            Value::Empty => f.write_str("empty"),
        }
    }
}

/// Numbers serialize as decimal strings so no precision is lost; dates as
/// ISO strings; empty as `null`.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(n) => serializer.serialize_str(&n.normalize().to_string()),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(d) => serializer.serialize_str(&d.to_string()),
            Value::Empty => serializer.serialize_none(),
        }
    }
}

// ──────────────────────────────────────────────
// Runtime values and context
// ──────────────────────────────────────────────

/// Current field values of one entity instance, keyed by field id.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RuntimeValues(pub BTreeMap<String, Value>);

impl RuntimeValues {
    pub fn new() -> Self {
        RuntimeValues(BTreeMap::new())
    }

    pub fn get(&self, field_id: &str) -> Option<&Value> {
        self.0.get(field_id)
    }

    pub fn insert(&mut self, field_id: impl Into<String>, value: Value) {
        self.0.insert(field_id.into(), value);
    }

    pub fn with(mut self, field_id: impl Into<String>, value: Value) -> Self {
        self.insert(field_id, value);
        self
    }

    /// Build runtime values from a JSON object, converting each member to
    /// the type its field declares in `schema`. Members that name no field
    /// of the schema are rejected.
    pub fn from_json(json: &serde_json::Value, schema: &SchemaSnapshot) -> Result<Self, EvalError> {
        let obj = json.as_object().ok_or_else(|| EvalError::InvalidInput {
            field_id: String::new(),
            message: "runtime values must be a JSON object".to_owned(),
        })?;
        let mut values = RuntimeValues::new();
        for (field_id, raw) in obj {
            let declared =
                schema
                    .field_type(field_id)
                    .ok_or_else(|| EvalError::InvalidInput {
                        field_id: field_id.clone(),
                        message: format!("entity '{}' has no such field", schema.entity_id),
                    })?;
            values.insert(field_id.clone(), Value::from_json(field_id, raw, declared)?);
        }
        Ok(values)
    }
}

/// Everything one evaluation call may read. Built fresh per call and
/// dropped afterwards.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub entity_id: &'a str,
    /// The field whose formula is being evaluated, for diagnostics.
    pub field_id: &'a str,
    pub values: &'a RuntimeValues,
    /// Reference date for `today()`.
    pub as_of: Option<Date>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(entity_id: &'a str, field_id: &'a str, values: &'a RuntimeValues) -> Self {
        EvaluationContext {
            entity_id,
            field_id,
            values,
            as_of: None,
        }
    }

    pub fn with_as_of(mut self, as_of: Date) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// Outcome of one formula evaluation, shaped for callers that want a DTO
/// rather than a `Result`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EvaluationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Fields read during evaluation, in first-read order.
    pub fields_read: Vec<String>,
}

impl EvaluationResult {
    pub fn from_outcome(outcome: Result<Value, EvalError>, fields_read: Vec<String>) -> Self {
        match outcome {
            Ok(value) => EvaluationResult {
                success: true,
                value: Some(value),
                failure_reason: None,
                fields_read,
            },
            Err(e) => EvaluationResult {
                success: false,
                value: None,
                failure_reason: Some(e.to_string()),
                fields_read,
            },
        }
    }
}
