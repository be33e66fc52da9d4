//! Validation of every formula in a bundle: calculated fields and control
//! rule conditions, each checked against the entity's schema and against
//! the type its consumer requires.

use formula_core::{validate_formula, EffectType, FormulaType, FormulaValidationResult};
use serde::Serialize;

use crate::bundle::AnalysisBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaOwner {
    CalculatedField,
    ControlRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaDiagnostics {
    pub owner: FormulaOwner,
    /// Field id or rule id.
    pub owner_id: String,
    pub formula: String,
    pub result: FormulaValidationResult,
    /// Type the consumer requires: the field's declared type, BOOLEAN for
    /// display rules, the target's type for VALUE_SET rules.
    pub required_type: FormulaType,
    /// Set when the inferred type is known and differs from `required_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_conflict: Option<String>,
}

impl FormulaDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.result.is_valid && self.type_conflict.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub formulas: Vec<FormulaDiagnostics>,
    pub invalid_count: usize,
}

pub fn analyze_validation(bundle: &AnalysisBundle) -> ValidationResult {
    let schema = &bundle.schema;
    let mut formulas = Vec::new();

    for (field_id, def) in schema.calculated_fields() {
        let formula = def.formula.clone().unwrap_or_default();
        formulas.push(diagnose(
            FormulaOwner::CalculatedField,
            field_id,
            formula,
            def.field_type,
            bundle,
        ));
    }

    let mut rules: Vec<_> = bundle.control_rules.iter().collect();
    rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    for rule in rules {
        let required = match rule.effect_type {
            EffectType::ValueSet => schema
                .field_type(&rule.target_field_id)
                .unwrap_or(FormulaType::Unknown),
            _ => FormulaType::Boolean,
        };
        formulas.push(diagnose(
            FormulaOwner::ControlRule,
            &rule.rule_id,
            rule.condition_formula.clone(),
            required,
            bundle,
        ));
    }

    let invalid_count = formulas.iter().filter(|d| !d.is_clean()).count();
    ValidationResult {
        formulas,
        invalid_count,
    }
}

fn diagnose(
    owner: FormulaOwner,
    owner_id: &str,
    formula: String,
    required_type: FormulaType,
    bundle: &AnalysisBundle,
) -> FormulaDiagnostics {
    let result = validate_formula(&formula, &bundle.schema);
    let inferred = result.inferred_type;
    let type_conflict = (!inferred.is_unknown()
        && !required_type.is_unknown()
        && inferred != required_type)
        .then(|| format!("formula yields {}, but {} is required", inferred, required_type));
    FormulaDiagnostics {
        owner,
        owner_id: owner_id.to_owned(),
        formula,
        result,
        required_type,
        type_conflict,
    }
}
