//! Output-mapping evaluation for document generation.
//!
//! Every failure is blocking: a mapping that cannot be evaluated aborts
//! the whole batch with a diagnostic naming the field and formula.

use std::collections::BTreeMap;

use formula_core::{parse_formula, FormulaType};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::entity::check_declared_type;
use crate::evaluator::evaluate;
use crate::limits::EvalLimits;
use crate::types::{EvalError, EvaluationContext, RuntimeValues, Value};

/// One output field and the formula that fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub field_id: String,
    pub formula: String,
    /// Expected result type; `UNKNOWN` accepts any.
    #[serde(default = "unknown_type")]
    pub result_type: FormulaType,
}

fn unknown_type() -> FormulaType {
    FormulaType::Unknown
}

impl OutputMapping {
    pub fn new(field_id: impl Into<String>, formula: impl Into<String>) -> Self {
        OutputMapping {
            field_id: field_id.into(),
            formula: formula.into(),
            result_type: FormulaType::Unknown,
        }
    }

    pub fn typed(mut self, result_type: FormulaType) -> Self {
        self.result_type = result_type;
        self
    }
}

/// Evaluate a single mapping against one entity instance.
pub fn evaluate_output_mapping(
    entity_id: &str,
    mapping: &OutputMapping,
    values: &RuntimeValues,
    as_of: Option<Date>,
    limits: &EvalLimits,
) -> Result<Value, EvalError> {
    let outcome = parse_formula(&mapping.formula)
        .map_err(|errors| EvalError::Syntax { errors })
        .and_then(|expr| {
            let mut ctx = EvaluationContext::new(entity_id, &mapping.field_id, values);
            ctx.as_of = as_of;
            evaluate(&expr, &ctx, limits.output_mapping_budget_ms)
        })
        .and_then(|value| check_declared_type(&value, mapping.result_type).map(|()| value));
    outcome.map_err(|e| {
        tracing::warn!(
            entity = entity_id,
            field = %mapping.field_id,
            formula = %mapping.formula,
            error = %e,
            "output mapping failed"
        );
        EvalError::blocking(
            format!("output field '{}'", mapping.field_id),
            &mapping.formula,
            e,
        )
    })
}

/// Evaluate all mappings in order; the first failure aborts the batch.
pub fn evaluate_output_mappings(
    entity_id: &str,
    mappings: &[OutputMapping],
    values: &RuntimeValues,
    as_of: Option<Date>,
    limits: &EvalLimits,
) -> Result<BTreeMap<String, Value>, EvalError> {
    let mut out = BTreeMap::new();
    for mapping in mappings {
        let value = evaluate_output_mapping(entity_id, mapping, values, as_of, limits)?;
        out.insert(mapping.field_id.clone(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn values() -> RuntimeValues {
        RuntimeValues::new()
            .with("first", Value::Text("Ada".into()))
            .with("last", Value::Text("Lovelace".into()))
            .with("qty", Value::Number(Decimal::from(3)))
    }

    #[test]
    fn evaluates_all_mappings() {
        let mappings = vec![
            OutputMapping::new("full_name", "concat(first, ' ', last)").typed(FormulaType::Text),
            OutputMapping::new("double", "qty * 2"),
        ];
        let out =
            evaluate_output_mappings("person", &mappings, &values(), None, &EvalLimits::default())
                .unwrap();
        assert_eq!(out["full_name"], Value::Text("Ada Lovelace".into()));
        assert_eq!(out["double"], Value::Number(Decimal::from(6)));
    }

    #[test]
    fn failure_blocks_and_names_field() {
        let mappings = vec![
            OutputMapping::new("ok", "qty"),
            OutputMapping::new("broken", "qty / (qty - 3)"),
        ];
        let err =
            evaluate_output_mappings("person", &mappings, &values(), None, &EvalLimits::default())
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "output field 'broken' (formula `qty / (qty - 3)`): division by zero"
        );
    }

    #[test]
    fn no_coercion_to_declared_type() {
        let mapping = OutputMapping::new("n", "first").typed(FormulaType::Number);
        let err = evaluate_output_mapping("person", &mapping, &values(), None, &EvalLimits::default())
            .unwrap_err();
        assert!(matches!(err.root_cause(), EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn unparsable_mapping_is_blocking() {
        let mapping = OutputMapping::new("n", "qty +");
        let err = evaluate_output_mapping("person", &mapping, &values(), None, &EvalLimits::default())
            .unwrap_err();
        assert!(matches!(err.root_cause(), EvalError::Syntax { .. }));
    }
}
