//! Control rule data model shared by the runtime engine and design-time
//! analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::parser::parse_formula;
use crate::resolve::collect_references;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectType {
    Visibility,
    Enabled,
    Required,
    ValueSet,
}

impl EffectType {
    /// Display rules degrade to the field's default state on failure.
    pub fn is_display(self) -> bool {
        !matches!(self, EffectType::ValueSet)
    }
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectType::Visibility => "VISIBILITY",
            EffectType::Enabled => "ENABLED",
            EffectType::Required => "REQUIRED",
            EffectType::ValueSet => "VALUE_SET",
        };
        f.write_str(name)
    }
}

/// A rule driving one effect on a target field. Immutable once authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRule {
    pub rule_id: String,
    pub source_field_id: String,
    pub target_field_id: String,
    pub effect_type: EffectType,
    /// Boolean condition for display rules; the value expression for
    /// VALUE_SET rules.
    pub condition_formula: String,
}

impl ControlRule {
    pub fn new(
        rule_id: impl Into<String>,
        source_field_id: impl Into<String>,
        target_field_id: impl Into<String>,
        effect_type: EffectType,
        condition_formula: impl Into<String>,
    ) -> Self {
        ControlRule {
            rule_id: rule_id.into(),
            source_field_id: source_field_id.into(),
            target_field_id: target_field_id.into(),
            effect_type,
            condition_formula: condition_formula.into(),
        }
    }
}

impl ControlRule {
    /// Fields the rule reads: the same-entity references of its parsed
    /// formula plus its declared source field.
    pub fn reads(&self, expr: &Expr, entity_id: &str) -> BTreeSet<String> {
        let mut reads = collect_references(expr, entity_id);
        reads.insert(self.source_field_id.clone());
        reads
    }

    /// Whether this rule's value must be applied before `downstream`, which
    /// reads `downstream_reads`. Only VALUE_SET rules produce values, and a
    /// rule reading its own target sees the input value, not a peer's.
    pub fn feeds(&self, downstream: &ControlRule, downstream_reads: &BTreeSet<String>) -> bool {
        self.effect_type == EffectType::ValueSet
            && self.target_field_id != downstream.target_field_id
            && downstream_reads.contains(&self.target_field_id)
    }
}

/// Control-chain adjacency: rule id -> ids of the VALUE_SET rules it pulls
/// in when evaluated. Every rule is a key. A rule whose formula does not
/// parse reads only its source field.
pub fn control_links(rules: &[ControlRule], entity_id: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for rule in rules {
        let reads = match parse_formula(&rule.condition_formula) {
            Ok(expr) => rule.reads(&expr, entity_id),
            Err(_) => BTreeSet::from([rule.source_field_id.clone()]),
        };
        let upstream = rules
            .iter()
            .filter(|u| u.feeds(rule, &reads))
            .map(|u| u.rule_id.clone());
        links.entry(rule.rule_id.clone()).or_default().extend(upstream);
    }
    links
}
