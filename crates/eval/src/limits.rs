//! Evaluation budgets.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::EvalError;

/// Tunable limits for evaluation. Every field has a default, so a partial
/// JSON object is a valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalLimits {
    /// Budget for one control rule, including its upstream chain.
    pub control_rule_budget_ms: u64,
    /// Budget for one output-mapping formula.
    pub output_mapping_budget_ms: u64,
    /// Budget for one calculated-field formula.
    pub calculated_field_budget_ms: u64,
    /// Maximum number of VALUE_SET hops a control chain may take.
    pub max_chain_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            control_rule_budget_ms: 100,
            output_mapping_budget_ms: 1000,
            calculated_field_budget_ms: 1000,
            max_chain_depth: 10,
        }
    }
}

impl EvalLimits {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        EvalLimits::deserialize(json)
    }
}

/// Wall-clock deadline for one evaluation. Only consulted to abort; it
/// never influences a produced value.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget_ms: u64,
}

impl Deadline {
    pub fn after_ms(budget_ms: u64) -> Self {
        Deadline {
            at: Instant::now() + Duration::from_millis(budget_ms),
            budget_ms,
        }
    }

    pub fn check(&self) -> Result<(), EvalError> {
        if Instant::now() >= self.at {
            return Err(EvalError::Timeout {
                budget_ms: self.budget_ms,
            });
        }
        Ok(())
    }
}
