//! Control rule engine behaviour across whole rule sets.

use std::str::FromStr;

use formula_core::{ControlRule, EffectType, FieldDefinition, FormulaType, SchemaSnapshot};
use formula_eval::{ControlOutcome, ControlRuleEngine, EvalError, EvalLimits, RuntimeValues, Value};
use rust_decimal::Decimal;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Fields `f0..=fN` linked by VALUE_SET rules `fi = f(i-1) + 1`, plus a
/// VISIBILITY rule on `panel` reading `fN`.
fn chain(n: usize) -> (SchemaSnapshot, Vec<ControlRule>) {
    let mut schema = SchemaSnapshot::new("form")
        .with_field("panel", FieldDefinition::input(FormulaType::Text));
    let mut rules = Vec::new();
    for i in 0..=n {
        schema = schema.with_field(format!("f{i}"), FieldDefinition::input(FormulaType::Number));
        if i > 0 {
            rules.push(ControlRule::new(
                format!("set-{i:02}"),
                format!("f{}", i - 1),
                format!("f{i}"),
                EffectType::ValueSet,
                format!("f{} + 1", i - 1),
            ));
        }
    }
    rules.push(ControlRule::new(
        "show-panel",
        format!("f{n}"),
        "panel",
        EffectType::Visibility,
        format!("f{n} > 100"),
    ));
    (schema, rules)
}

fn chain_values(n: usize) -> RuntimeValues {
    let mut values = RuntimeValues::new().with("panel", Value::Empty);
    for i in 0..=n {
        values.insert(format!("f{i}"), Value::Number(Decimal::ZERO));
    }
    values
}

#[test]
fn rule_on_deleted_field_falls_back_to_visible() {
    init_tracing();
    let schema = SchemaSnapshot::new("form")
        .with_field("notes", FieldDefinition::input(FormulaType::Text));
    let rules = vec![ControlRule::new(
        "r1",
        "legacy_flag",
        "notes",
        EffectType::Visibility,
        "legacy_flag == true",
    )];
    let values = RuntimeValues::new().with("notes", Value::Text("x".into()));
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());

    let report = engine.evaluate_all(&values, None).expect("display failures never raise");
    let notes = &report.fields["notes"];
    assert!(notes.visible);
    assert!(notes.fallback_used);
    match &report.results[0].outcome {
        ControlOutcome::Flag { failure_reason, .. } => {
            assert!(failure_reason.as_deref().unwrap_or("").contains("legacy_flag"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn chain_of_ten_hops_is_evaluated() {
    init_tracing();
    let (schema, rules) = chain(10);
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());
    let report = engine.evaluate_all(&chain_values(10), None).unwrap();
    assert_eq!(
        report.fields["f10"].value,
        Some(Value::Number(Decimal::from_str("10").unwrap()))
    );
    let panel = &report.fields["panel"];
    assert!(!panel.visible);
    assert!(!panel.fallback_used);
}

#[test]
fn chain_of_eleven_hops_fails() {
    init_tracing();
    let (schema, rules) = chain(11);
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());
    let show = rules.iter().find(|r| r.rule_id == "show-panel").unwrap();
    let result = engine.evaluate_rule(show, &chain_values(11), None).unwrap();
    assert!(result.fallback_used());

    // `set-11` reaches `set-01` in ten hops, so it still resolves.
    let last = rules.iter().find(|r| r.rule_id == "set-11").unwrap();
    assert!(engine.evaluate_rule(last, &chain_values(11), None).is_ok());
}

#[test]
fn configured_depth_is_respected() {
    let (schema, rules) = chain(3);
    let limits = EvalLimits {
        max_chain_depth: 1,
        ..EvalLimits::default()
    };
    let engine = ControlRuleEngine::new(&schema, &rules, limits);
    let last = rules.iter().find(|r| r.rule_id == "set-03").unwrap();
    let err = engine.evaluate_rule(last, &chain_values(3), None).unwrap_err();
    assert_eq!(
        err.root_cause(),
        &EvalError::ChainDepthExceeded {
            rule_id: "set-01".into(),
            max_depth: 1
        }
    );
}

#[test]
fn last_value_set_wins() {
    let schema = SchemaSnapshot::new("form")
        .with_field("status", FieldDefinition::input(FormulaType::Text));
    let rules = vec![
        ControlRule::new("b", "status", "status", EffectType::ValueSet, "'second'"),
        ControlRule::new("a", "status", "status", EffectType::ValueSet, "'first'"),
    ];
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());
    let report = engine
        .evaluate_all(&RuntimeValues::new().with("status", Value::Empty), None)
        .unwrap();
    assert_eq!(report.fields["status"].value, Some(Value::Text("second".into())));
    let ids: Vec<&str> = report.results.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn report_serializes_for_callers() {
    let (schema, rules) = chain(1);
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());
    let report = engine.evaluate_all(&chain_values(1), None).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["fields"]["f1"]["value"], "1");
    assert_eq!(json["fields"]["panel"]["visible"], false);
    assert_eq!(json["results"][0]["outcome"]["kind"], "value");
    assert_eq!(json["results"][1]["outcome"]["kind"], "flag");
}

#[test]
fn value_set_rules_reading_each_other_block() {
    let schema = SchemaSnapshot::new("form")
        .with_field("a", FieldDefinition::input(FormulaType::Number))
        .with_field("b", FieldDefinition::input(FormulaType::Number))
        .with_field("c", FieldDefinition::input(FormulaType::Number));
    let rules = vec![
        ControlRule::new("r1", "a", "b", EffectType::ValueSet, "c + 1"),
        ControlRule::new("r2", "a", "c", EffectType::ValueSet, "b + 1"),
    ];
    let values = RuntimeValues::new()
        .with("a", Value::Number(Decimal::ZERO))
        .with("b", Value::Number(Decimal::ZERO))
        .with("c", Value::Number(Decimal::ZERO));
    let engine = ControlRuleEngine::new(&schema, &rules, EvalLimits::default());
    let err = engine.evaluate_all(&values, None).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        EvalError::ChainDepthExceeded { max_depth: 10, .. }
    ));
}
