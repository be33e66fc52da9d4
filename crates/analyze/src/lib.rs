//! formula-analyze: design-time analysis of one entity's formulas and
//! control rules, with structured, serializable output.
//!
//! Each analysis is a separate module producing a result struct. The
//! `analyze()` function runs all of them over an analysis bundle (schema
//! snapshot plus control rules) and aggregates the results into an
//! `AnalysisReport`. Analyses are read-only and recomputed from scratch on
//! every call, so re-running on unchanged input yields identical output.

pub mod bundle;
pub mod control_chains;
pub mod formula_cycles;
pub mod report;
pub mod validation;

pub use bundle::{AnalysisBundle, AnalysisError};
pub use control_chains::{
    analyze_control_chains, ControlChain, ControlChainAnalysisResult, DEFAULT_MAX_CHAIN_DEPTH,
};
pub use formula_core::Severity;
pub use formula_cycles::{analyze_formula_cycles, FormulaCycleAnalysisResult};
pub use report::{AnalysisReport, Finding};
pub use validation::{analyze_validation, FormulaDiagnostics, FormulaOwner, ValidationResult};

/// Names accepted by [`analyze_selected`].
pub const ANALYSES: &[&str] = &["validation", "formula_cycles", "control_chains"];

/// Run every analysis on a JSON analysis bundle.
pub fn analyze(bundle: &serde_json::Value) -> Result<AnalysisReport, AnalysisError> {
    let bundle = AnalysisBundle::from_json(bundle)?;
    Ok(analyze_bundle(&bundle, ANALYSES))
}

/// Run only the named analyses.
///
/// Valid analysis names: "validation", "formula_cycles", "control_chains".
pub fn analyze_selected(
    bundle: &serde_json::Value,
    analyses: &[&str],
) -> Result<AnalysisReport, AnalysisError> {
    if let Some(unknown) = analyses.iter().find(|a| !ANALYSES.contains(*a)) {
        return Err(AnalysisError::UnknownAnalysis((*unknown).to_string()));
    }
    let bundle = AnalysisBundle::from_json(bundle)?;
    Ok(analyze_bundle(&bundle, analyses))
}

/// Run the named analyses on an already deserialized bundle, in a fixed
/// order regardless of the order requested.
pub fn analyze_bundle(bundle: &AnalysisBundle, analyses: &[&str]) -> AnalysisReport {
    let mut report = AnalysisReport::new(bundle.schema.entity_id.clone());
    for name in ANALYSES.iter().filter(|n| analyses.contains(*n)) {
        match *name {
            "validation" => report.validation = Some(analyze_validation(bundle)),
            "formula_cycles" => {
                report.formula_cycles = Some(analyze_formula_cycles(&bundle.schema))
            }
            _ => {
                report.control_chains = Some(analyze_control_chains(
                    &bundle.schema.entity_id,
                    &bundle.control_rules,
                    DEFAULT_MAX_CHAIN_DEPTH,
                ))
            }
        }
        report.analyses_run.push((*name).to_string());
    }
    report.extract_findings();
    report
}
