//! formula-eval: the runtime half of the formula engine.
//!
//! Evaluates parsed formulas against one entity instance's current field
//! values, recomputes calculated fields in dependency order, evaluates
//! output mappings, and runs control rules with bounded chaining.
//!
//! Evaluation is pull-based and deterministic: a caller invokes it, every
//! input comes through the arguments, and nothing is cached between calls.

pub mod builtins;
pub mod control;
pub mod entity;
pub mod evaluator;
pub mod limits;
pub mod numeric;
pub mod output;
pub mod provenance;
pub mod types;

pub use control::{
    ControlEvaluationResult, ControlOutcome, ControlReport, ControlRuleEngine, FieldState,
};
pub use entity::evaluate_calculated_fields;
pub use evaluator::{eval_expr, evaluate, evaluate_formula};
pub use limits::{Deadline, EvalLimits};
pub use output::{evaluate_output_mapping, evaluate_output_mappings, OutputMapping};
pub use types::{EvalError, EvaluationContext, EvaluationResult, RuntimeValues, Value};

use formula_core::SchemaSnapshot;
use time::Date;

/// Recompute an entity instance's calculated fields from JSON inputs.
///
/// # Arguments
/// * `schema` - Schema snapshot JSON (`{"entity_id": .., "fields": {..}}`)
/// * `values` - Input field values, keyed by field id
/// * `as_of` - Reference date for `today()`, if any formula uses it
///
/// # Returns
/// * Every field value, inputs and calculated fields alike, or the first
///   blocking `EvalError`
pub fn evaluate_entity(
    schema: &serde_json::Value,
    values: &serde_json::Value,
    as_of: Option<Date>,
) -> Result<RuntimeValues, EvalError> {
    let schema = SchemaSnapshot::from_json(schema).map_err(|e| EvalError::InvalidInput {
        field_id: String::new(),
        message: format!("schema snapshot: {}", e),
    })?;
    let inputs = RuntimeValues::from_json(values, &schema)?;
    evaluate_calculated_fields(&schema, &inputs, as_of, &EvalLimits::default())
}
