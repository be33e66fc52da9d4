//! End-to-end evaluation scenarios: parse, type-check, evaluate.

use std::str::FromStr;

use formula_core::{parse_formula, type_check, FieldDefinition, FormulaType, SchemaSnapshot};
use formula_eval::{
    evaluate, evaluate_calculated_fields, evaluate_entity, EvalError, EvalLimits,
    EvaluationContext, RuntimeValues, Value,
};
use rust_decimal::Decimal;
use serde_json::json;
use time::macros::date;

fn number(s: &str) -> Value {
    Value::Number(Decimal::from_str(s).unwrap())
}

#[test]
fn literal_sum_parses_infers_and_evaluates() {
    let schema = SchemaSnapshot::new("e");
    let expr = parse_formula("10 + 5").unwrap();
    assert_eq!(type_check(&expr, &schema).inferred, FormulaType::Number);

    let values = RuntimeValues::new();
    let ctx = EvaluationContext::new("e", "total", &values);
    assert_eq!(evaluate(&expr, &ctx, 100).unwrap(), number("15"));
}

#[test]
fn linear_chain_evaluates_every_formula() {
    let schema = json!({
        "entity_id": "e",
        "fields": {
            "A": {"field_type": "NUMBER", "is_calculated": true, "formula": "B + 1"},
            "B": {"field_type": "NUMBER", "is_calculated": true, "formula": "C + 1"},
            "C": {"field_type": "NUMBER", "is_calculated": true, "formula": "10"}
        }
    });
    let values = evaluate_entity(&schema, &json!({}), None).unwrap();
    assert_eq!(values.get("C"), Some(&number("10")));
    assert_eq!(values.get("B"), Some(&number("11")));
    assert_eq!(values.get("A"), Some(&number("12")));
    assert_eq!(
        serde_json::to_value(&values).unwrap(),
        json!({"A": "12", "B": "11", "C": "10"})
    );
}

#[test]
fn cyclic_entity_fails_fast() {
    let schema = json!({
        "entity_id": "e",
        "fields": {
            "A": {"field_type": "NUMBER", "is_calculated": true, "formula": "B + 1"},
            "B": {"field_type": "NUMBER", "is_calculated": true, "formula": "A + 1"}
        }
    });
    assert!(matches!(
        evaluate_entity(&schema, &json!({}), None),
        Err(EvalError::CyclicDependency { .. })
    ));
}

#[test]
fn evaluation_is_deterministic() {
    let schema = SchemaSnapshot::new("invoice")
        .with_field("net", FieldDefinition::input(FormulaType::Number))
        .with_field("rate", FieldDefinition::input(FormulaType::Number))
        .with_field(
            "gross",
            FieldDefinition::calculated(FormulaType::Number, "round(net * (1 + rate / 100), 2)"),
        )
        .with_field(
            "label",
            FieldDefinition::calculated(
                FormulaType::Text,
                "concat(upper(left('invoice', 3)), '-', if_else(gross > 100, 'L', 'S'))",
            ),
        );
    let inputs = RuntimeValues::new()
        .with("net", number("99.99"))
        .with("rate", number("19"));
    let limits = EvalLimits::default();
    let first = evaluate_calculated_fields(&schema, &inputs, None, &limits).unwrap();
    let second = evaluate_calculated_fields(&schema, &inputs, None, &limits).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get("gross"), Some(&number("118.99")));
    assert_eq!(first.get("label"), Some(&Value::Text("INV-L".into())));
}

#[test]
fn successful_evaluation_matches_inferred_type() {
    let schema = SchemaSnapshot::new("order")
        .with_field("qty", FieldDefinition::input(FormulaType::Number))
        .with_field("name", FieldDefinition::input(FormulaType::Text))
        .with_field("due", FieldDefinition::input(FormulaType::Date))
        .with_field("rush", FieldDefinition::input(FormulaType::Boolean));
    let values = RuntimeValues::new()
        .with("qty", number("7"))
        .with("name", Value::Text(" Bolt ".into()))
        .with("due", Value::Date(date!(2025 - 02 - 28)))
        .with("rush", Value::Boolean(false));

    let formulas = [
        "qty * 3 - 1",
        "sum(qty, 1, 2.5) / 2",
        "pow(qty, 2) % 5",
        "trim(name)",
        "length(name) > 3 and not rush",
        "if_else(rush, due, today())",
        "coalesce(name, 'none')",
        "year(due) + month(due) + day(due)",
        "mid(name, 2, 3) == 'Bol'",
        "max(qty, abs(-9), ceil(2.1))",
        "is_empty(name) || due >= #2025-01-01#",
    ];
    for src in formulas {
        let expr = parse_formula(src).unwrap();
        let inferred = type_check(&expr, &schema).inferred;
        assert_ne!(inferred, FormulaType::Unknown, "{src} should infer a type");
        let ctx = EvaluationContext::new("order", "out", &values).with_as_of(date!(2025 - 01 - 15));
        let value = evaluate(&expr, &ctx, 1000).unwrap();
        assert_eq!(value.formula_type(), Some(inferred), "{src}");
    }
}

#[test]
fn runtime_failures_are_reported_not_coerced() {
    let values = RuntimeValues::new().with("qty", number("0"));
    let ctx = EvaluationContext::new("order", "out", &values);
    for (src, expected) in [
        ("10 / qty", EvalError::DivisionByZero),
        (
            "missing + 1",
            EvalError::UnresolvedReference {
                field_id: "missing".into(),
            },
        ),
    ] {
        let expr = parse_formula(src).unwrap();
        assert_eq!(evaluate(&expr, &ctx, 100), Err(expected));
    }
}

#[test]
fn very_long_operator_chain_blocks_instead_of_crashing() {
    let formula = vec!["1"; 10_000].join(" + ");
    let schema = json!({
        "entity_id": "e",
        "fields": {
            "total": {"field_type": "NUMBER", "is_calculated": true, "formula": formula}
        }
    });
    let err = evaluate_entity(&schema, &json!({}), None).unwrap_err();
    assert!(matches!(err.root_cause(), EvalError::Syntax { .. }));
    assert!(err.to_string().starts_with("field 'total'"));

    let fits = vec!["1"; 64].join(" + ");
    let expr = parse_formula(&fits).unwrap();
    let values = RuntimeValues::new();
    let ctx = EvaluationContext::new("e", "total", &values);
    assert_eq!(evaluate(&expr, &ctx, 100).unwrap(), number("64"));
}
