//! Cycle analysis over an entity's calculated-field formulas.
//!
//! Runs from scratch on every call and never blocks anything: cycles are
//! reported as data for the caller to warn or block on.

use formula_core::{CycleReport, DependencyGraph, SchemaSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaCycleAnalysisResult {
    pub has_cycle: bool,
    pub cycles: Vec<CycleReport>,
    /// Number of calculated fields in the graph.
    pub analyzed_field_count: usize,
}

/// Detect every cycle among the calculated fields of `schema`.
pub fn analyze_formula_cycles(schema: &SchemaSnapshot) -> FormulaCycleAnalysisResult {
    let graph = DependencyGraph::build(schema);
    let cycles = graph.find_cycles();
    tracing::debug!(
        entity = %schema.entity_id,
        fields = graph.node_count(),
        cycles = cycles.len(),
        "analyzed formula cycles"
    );
    FormulaCycleAnalysisResult {
        has_cycle: !cycles.is_empty(),
        cycles,
        analyzed_field_count: graph.node_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_core::{FieldDefinition, FormulaType};

    #[test]
    fn input_fields_are_not_counted() {
        let schema = SchemaSnapshot::new("e")
            .with_field("a", FieldDefinition::calculated(FormulaType::Number, "b * 2"))
            .with_field("b", FieldDefinition::input(FormulaType::Number));
        let result = analyze_formula_cycles(&schema);
        assert!(!result.has_cycle);
        assert_eq!(result.analyzed_field_count, 1);
    }
}
