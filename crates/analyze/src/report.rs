//! AnalysisReport: aggregated output of all analyses.
//!
//! The report collects results from each analysis module and extracts
//! notable findings for summary display.

use formula_core::Severity;
use serde::Serialize;

use crate::control_chains::ControlChainAnalysisResult;
use crate::formula_cycles::FormulaCycleAnalysisResult;
use crate::validation::{FormulaOwner, ValidationResult};

/// A notable finding from analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub analysis: String,
    pub severity: Severity,
    pub message: String,
    /// Field or rule the finding is about, when there is a single one.
    pub subject_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

/// Aggregated analysis report.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnalysisReport {
    pub entity_id: String,
    pub validation: Option<ValidationResult>,
    pub formula_cycles: Option<FormulaCycleAnalysisResult>,
    pub control_chains: Option<ControlChainAnalysisResult>,
    pub analyses_run: Vec<String>,
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    pub fn new(entity_id: impl Into<String>) -> Self {
        AnalysisReport {
            entity_id: entity_id.into(),
            ..AnalysisReport::default()
        }
    }

    /// Highest severity among the findings, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Extract findings from populated analysis results, most severe first.
    pub fn extract_findings(&mut self) {
        self.findings.clear();

        if let Some(ref validation) = self.validation {
            for diag in &validation.formulas {
                let owner = match diag.owner {
                    FormulaOwner::CalculatedField => "Field",
                    FormulaOwner::ControlRule => "Control rule",
                };
                let errors = diag.result.error_count();
                if errors > 0 {
                    self.findings.push(Finding {
                        analysis: "validation".to_string(),
                        severity: Severity::Error,
                        message: format!(
                            "{} '{}' has {} formula error(s)",
                            owner, diag.owner_id, errors
                        ),
                        subject_id: Some(diag.owner_id.clone()),
                        details: serde_json::to_value(&diag.result).ok(),
                    });
                }
                if let Some(conflict) = &diag.type_conflict {
                    self.findings.push(Finding {
                        analysis: "validation".to_string(),
                        severity: Severity::Error,
                        message: format!("{} '{}': {}", owner, diag.owner_id, conflict),
                        subject_id: Some(diag.owner_id.clone()),
                        details: None,
                    });
                }
                for note in &diag.result.info {
                    self.findings.push(Finding {
                        analysis: "validation".to_string(),
                        severity: Severity::Info,
                        message: format!("{} '{}': {}", owner, diag.owner_id, note),
                        subject_id: Some(diag.owner_id.clone()),
                        details: None,
                    });
                }
            }
        }

        if let Some(ref cycles) = self.formula_cycles {
            for cycle in &cycles.cycles {
                self.findings.push(Finding {
                    analysis: "formula_cycles".to_string(),
                    severity: cycle.severity,
                    message: format!("Calculated fields form a cycle: {}", cycle.cycle_path),
                    subject_id: None,
                    details: Some(serde_json::json!({ "field_ids": cycle.field_ids })),
                });
            }
        }

        if let Some(ref chains) = self.control_chains {
            for cycle in &chains.cycles {
                self.findings.push(Finding {
                    analysis: "control_chains".to_string(),
                    severity: cycle.severity,
                    message: format!(
                        "Control rules pull each other in a cycle and can never be resolved: {}",
                        cycle.cycle_path
                    ),
                    subject_id: None,
                    details: Some(serde_json::json!({ "rule_ids": cycle.field_ids })),
                });
            }
            for chain in &chains.over_limit {
                self.findings.push(Finding {
                    analysis: "control_chains".to_string(),
                    severity: Severity::Warning,
                    message: format!(
                        "Control rule '{}' pulls in a chain of {} hops; evaluation fails past {} hops",
                        chain.requested_rule(),
                        chain.hops,
                        chains.max_chain_depth
                    ),
                    subject_id: Some(chain.requested_rule().to_owned()),
                    details: Some(serde_json::json!({ "rule_ids": chain.rule_ids })),
                });
            }
        }

        // Stable: equal severities keep extraction order.
        self.findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    }
}
