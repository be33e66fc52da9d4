//! Recomputation of an entity instance's calculated fields.

use formula_core::{parse_formula, DependencyGraph, FormulaType, SchemaSnapshot};
use time::Date;

use crate::evaluator::evaluate;
use crate::limits::EvalLimits;
use crate::types::{EvalError, EvaluationContext, RuntimeValues, Value};

/// Evaluate every calculated field of `schema` in dependency order,
/// starting from the supplied input values.
///
/// Fails fast: a cyclic graph is rejected before anything is evaluated,
/// and the first failing field aborts the whole recomputation. Each
/// result must match its field's declared type, or be empty.
pub fn evaluate_calculated_fields(
    schema: &SchemaSnapshot,
    inputs: &RuntimeValues,
    as_of: Option<Date>,
    limits: &EvalLimits,
) -> Result<RuntimeValues, EvalError> {
    let graph = DependencyGraph::build(schema);
    let order = graph.evaluation_order().map_err(|cycles| {
        let cycles: Vec<String> = cycles.into_iter().map(|c| c.cycle_path).collect();
        tracing::warn!(entity = %schema.entity_id, ?cycles, "calculated fields are cyclic");
        EvalError::CyclicDependency { cycles }
    })?;

    let mut values = inputs.clone();
    for field_id in &order {
        let Some(def) = schema.get(field_id) else {
            continue;
        };
        let formula = def.formula.as_deref().unwrap_or_default();
        let value = evaluate_field(schema, field_id, formula, def.field_type, &values, as_of, limits)
            .map_err(|e| {
                tracing::debug!(entity = %schema.entity_id, field = %field_id, error = %e, "calculated field failed");
                EvalError::blocking(format!("field '{}'", field_id), formula, e)
            })?;
        values.insert(field_id.clone(), value);
    }
    tracing::debug!(entity = %schema.entity_id, fields = order.len(), "recomputed calculated fields");
    Ok(values)
}

fn evaluate_field(
    schema: &SchemaSnapshot,
    field_id: &str,
    formula: &str,
    declared: FormulaType,
    values: &RuntimeValues,
    as_of: Option<Date>,
    limits: &EvalLimits,
) -> Result<Value, EvalError> {
    if formula.trim().is_empty() {
        return Ok(Value::Empty);
    }
    let expr = parse_formula(formula).map_err(|errors| EvalError::Syntax { errors })?;
    let mut ctx = EvaluationContext::new(&schema.entity_id, field_id, values);
    ctx.as_of = as_of;
    let value = evaluate(&expr, &ctx, limits.calculated_field_budget_ms)?;
    check_declared_type(&value, declared)?;
    Ok(value)
}

/// A produced value must have the type its target field declares.
pub(crate) fn check_declared_type(value: &Value, declared: FormulaType) -> Result<(), EvalError> {
    match value.formula_type() {
        Some(found) if !declared.is_unknown() && found != declared => Err(EvalError::TypeMismatch {
            context: "target field".to_owned(),
            expected: declared.to_string(),
            found: found.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_core::FieldDefinition;
    use rust_decimal::Decimal;

    fn chain() -> SchemaSnapshot {
        SchemaSnapshot::new("e")
            .with_field("A", FieldDefinition::calculated(FormulaType::Number, "B + 1"))
            .with_field("B", FieldDefinition::calculated(FormulaType::Number, "C + 1"))
            .with_field("C", FieldDefinition::calculated(FormulaType::Number, "base * 2"))
            .with_field("base", FieldDefinition::input(FormulaType::Number))
    }

    #[test]
    fn evaluates_in_dependency_order() {
        let inputs = RuntimeValues::new().with("base", Value::Number(Decimal::from(5)));
        let out = evaluate_calculated_fields(&chain(), &inputs, None, &EvalLimits::default()).unwrap();
        assert_eq!(out.get("C"), Some(&Value::Number(Decimal::from(10))));
        assert_eq!(out.get("A"), Some(&Value::Number(Decimal::from(12))));
    }

    #[test]
    fn cycles_fail_before_evaluation() {
        let schema = SchemaSnapshot::new("e")
            .with_field("A", FieldDefinition::calculated(FormulaType::Number, "B + 1"))
            .with_field("B", FieldDefinition::calculated(FormulaType::Number, "A + 1"));
        let err = evaluate_calculated_fields(&schema, &RuntimeValues::new(), None, &EvalLimits::default())
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::CyclicDependency {
                cycles: vec!["A \u{2192} B \u{2192} A".to_owned()]
            }
        );
    }

    #[test]
    fn failing_field_names_field_and_formula() {
        let inputs = RuntimeValues::new().with("base", Value::Empty);
        let err = evaluate_calculated_fields(&chain(), &inputs, None, &EvalLimits::default()).unwrap_err();
        match err {
            EvalError::Blocking { subject, formula, .. } => {
                assert_eq!(subject, "field 'C'");
                assert_eq!(formula, "base * 2");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn declared_type_is_enforced() {
        let schema = SchemaSnapshot::new("e")
            .with_field("label", FieldDefinition::calculated(FormulaType::Number, "'x'"));
        let err = evaluate_calculated_fields(&schema, &RuntimeValues::new(), None, &EvalLimits::default())
            .unwrap_err();
        assert!(matches!(err.root_cause(), EvalError::TypeMismatch { .. }));
    }
}
