//! Control rule engine.
//!
//! Evaluates VISIBILITY, ENABLED, REQUIRED and VALUE_SET rules for one
//! entity instance. A rule whose formula reads a field that a VALUE_SET
//! rule targets sees that rule's value, resolved first; such chains are
//! followed with an explicit depth counter and fail once they exceed
//! [`EvalLimits::max_chain_depth`] hops.
//!
//! Display rules never fail the caller: on error the target falls back to
//! its default state (visible, enabled, not required) and the failure is
//! logged. VALUE_SET failures are returned as blocking errors.

use std::collections::BTreeMap;

use formula_core::{parse_formula, ControlRule, EffectType, SchemaSnapshot};
use serde::Serialize;
use time::Date;

use crate::entity::check_declared_type;
use crate::evaluator::eval_expr;
use crate::limits::{Deadline, EvalLimits};
use crate::provenance::ReadCollector;
use crate::types::{EvalError, EvaluationContext, RuntimeValues, Value};

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// Outcome of a VISIBILITY, ENABLED or REQUIRED rule.
    Flag {
        value: bool,
        fallback_used: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
    },
    /// Value produced by a VALUE_SET rule.
    Value { value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlEvaluationResult {
    pub rule_id: String,
    pub target_field_id: String,
    pub effect_type: EffectType,
    pub outcome: ControlOutcome,
}

impl ControlEvaluationResult {
    pub fn fallback_used(&self) -> bool {
        matches!(
            self.outcome,
            ControlOutcome::Flag {
                fallback_used: true,
                ..
            }
        )
    }
}

/// Combined state of one target field after all of its rules ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldState {
    pub visible: bool,
    pub enabled: bool,
    pub required: bool,
    /// Value assigned by VALUE_SET rules, if any targets this field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// True when at least one display rule on this field fell back.
    pub fallback_used: bool,
}

impl Default for FieldState {
    fn default() -> Self {
        FieldState {
            visible: true,
            enabled: true,
            required: false,
            value: None,
            fallback_used: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ControlReport {
    pub fields: BTreeMap<String, FieldState>,
    /// Per-rule results in rule-id order.
    pub results: Vec<ControlEvaluationResult>,
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

/// Rule default when a display rule cannot be evaluated.
fn fallback(effect: EffectType) -> bool {
    !matches!(effect, EffectType::Required)
}

pub struct ControlRuleEngine<'a> {
    schema: &'a SchemaSnapshot,
    /// Sorted by rule id.
    rules: Vec<&'a ControlRule>,
    limits: EvalLimits,
}

impl<'a> ControlRuleEngine<'a> {
    pub fn new(schema: &'a SchemaSnapshot, rules: &'a [ControlRule], limits: EvalLimits) -> Self {
        let mut rules: Vec<&ControlRule> = rules.iter().collect();
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        ControlRuleEngine {
            schema,
            rules,
            limits,
        }
    }

    /// Evaluate one rule, with its upstream VALUE_SET chain, inside one
    /// control-rule budget.
    ///
    /// Display rules always return `Ok`; a failure shows up as
    /// `fallback_used`. A VALUE_SET failure is `Err`.
    pub fn evaluate_rule(
        &self,
        rule: &ControlRule,
        values: &RuntimeValues,
        as_of: Option<Date>,
    ) -> Result<ControlEvaluationResult, EvalError> {
        let deadline = Deadline::after_ms(self.limits.control_rule_budget_ms);
        let resolved = self.resolve(rule, values, as_of, &deadline, 0);

        let outcome = if rule.effect_type.is_display() {
            let flag = resolved.and_then(|v| v.as_bool(&format!("{} rule", rule.effect_type)));
            match flag {
                Ok(value) => ControlOutcome::Flag {
                    value,
                    fallback_used: false,
                    failure_reason: None,
                },
                Err(e) => {
                    let value = fallback(rule.effect_type);
                    tracing::warn!(
                        rule = %rule.rule_id,
                        target = %rule.target_field_id,
                        effect = %rule.effect_type,
                        error = %e,
                        fallback = value,
                        "control rule failed; using default state"
                    );
                    ControlOutcome::Flag {
                        value,
                        fallback_used: true,
                        failure_reason: Some(e.to_string()),
                    }
                }
            }
        } else {
            let value = resolved.map_err(|e| self.blocking(rule, e))?;
            ControlOutcome::Value { value }
        };

        Ok(ControlEvaluationResult {
            rule_id: rule.rule_id.clone(),
            target_field_id: rule.target_field_id.clone(),
            effect_type: rule.effect_type,
            outcome,
        })
    }

    /// Evaluate every rule and combine the results per target field.
    ///
    /// Visible and enabled are the AND of their rules, required is the OR,
    /// and VALUE_SET rules apply in rule-id order with the last one
    /// winning. The first VALUE_SET failure aborts evaluation.
    pub fn evaluate_all(
        &self,
        values: &RuntimeValues,
        as_of: Option<Date>,
    ) -> Result<ControlReport, EvalError> {
        let mut report = ControlReport::default();
        for rule in &self.rules {
            let result = self.evaluate_rule(rule, values, as_of)?;
            let state = report
                .fields
                .entry(result.target_field_id.clone())
                .or_default();
            match &result.outcome {
                ControlOutcome::Flag {
                    value,
                    fallback_used,
                    ..
                } => {
                    match result.effect_type {
                        EffectType::Visibility => state.visible &= *value,
                        EffectType::Enabled => state.enabled &= *value,
                        EffectType::Required => state.required |= *value,
                        EffectType::ValueSet => {}
                    }
                    state.fallback_used |= *fallback_used;
                }
                ControlOutcome::Value { value } => state.value = Some(value.clone()),
            }
            report.results.push(result);
        }
        tracing::debug!(
            entity = %self.schema.entity_id,
            rules = report.results.len(),
            fallbacks = report.results.iter().filter(|r| r.fallback_used()).count(),
            "evaluated control rules"
        );
        Ok(report)
    }

    /// Evaluate `rule`'s formula after resolving every VALUE_SET rule that
    /// targets a field the formula reads. Rules sharing `rule`'s own target
    /// are not upstream of it: a rule reading its target sees the input
    /// value. `depth` counts hops from the rule the caller asked for.
    fn resolve(
        &self,
        rule: &ControlRule,
        base: &RuntimeValues,
        as_of: Option<Date>,
        deadline: &Deadline,
        depth: usize,
    ) -> Result<Value, EvalError> {
        if depth > self.limits.max_chain_depth {
            return Err(EvalError::ChainDepthExceeded {
                rule_id: rule.rule_id.clone(),
                max_depth: self.limits.max_chain_depth,
            });
        }
        deadline.check()?;
        let expr =
            parse_formula(&rule.condition_formula).map_err(|errors| EvalError::Syntax { errors })?;
        let reads = rule.reads(&expr, &self.schema.entity_id);

        let mut overlay: Option<RuntimeValues> = None;
        for upstream in &self.rules {
            if !upstream.feeds(rule, &reads) {
                continue;
            }
            let value = self.resolve(upstream, base, as_of, deadline, depth + 1)?;
            self.check_target(upstream, &value)?;
            overlay
                .get_or_insert_with(|| base.clone())
                .insert(upstream.target_field_id.clone(), value);
        }
        let values = overlay.as_ref().unwrap_or(base);

        let mut ctx = EvaluationContext::new(&self.schema.entity_id, &rule.target_field_id, values);
        ctx.as_of = as_of;
        let value = eval_expr(&expr, &ctx, deadline, &mut ReadCollector::new())?;
        if rule.effect_type == EffectType::ValueSet {
            self.check_target(rule, &value)?;
        }
        Ok(value)
    }

    /// VALUE_SET results must fit the target field's declared type.
    fn check_target(&self, rule: &ControlRule, value: &Value) -> Result<(), EvalError> {
        let declared = self
            .schema
            .field_type(&rule.target_field_id)
            .ok_or_else(|| EvalError::UnresolvedReference {
                field_id: rule.target_field_id.clone(),
            })?;
        check_declared_type(value, declared)
    }

    fn blocking(&self, rule: &ControlRule, e: EvalError) -> EvalError {
        tracing::warn!(
            rule = %rule.rule_id,
            target = %rule.target_field_id,
            error = %e,
            "VALUE_SET rule failed"
        );
        EvalError::blocking(
            format!(
                "rule '{}' setting field '{}'",
                rule.rule_id, rule.target_field_id
            ),
            &rule.condition_formula,
            e,
        )
    }
}
