//! Design-time validation of a single formula.
//!
//! Runs the tokenizer and parser, then the type checker and reference
//! resolver side by side, and gathers every diagnostic into one DTO so an
//! editor can show all problems at once.

use serde::Serialize;

use crate::ast::Expr;
use crate::error::{SyntaxError, TypeError, UnresolvedReference};
use crate::parser::parse_formula;
use crate::resolve::resolve_references;
use crate::schema::{FormulaType, SchemaSnapshot};
use crate::typecheck::type_check;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaValidationResult {
    pub is_valid: bool,
    pub inferred_type: FormulaType,
    pub syntax_errors: Vec<SyntaxError>,
    pub unresolved_references: Vec<UnresolvedReference>,
    pub type_errors: Vec<TypeError>,
    /// Informational notes that do not affect validity.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<String>,
}

impl FormulaValidationResult {
    fn empty_formula() -> Self {
        FormulaValidationResult {
            is_valid: true,
            inferred_type: FormulaType::Unknown,
            syntax_errors: Vec::new(),
            unresolved_references: Vec::new(),
            type_errors: Vec::new(),
            info: vec!["formula is empty; its type is UNKNOWN".to_owned()],
        }
    }

    fn syntax(errors: Vec<SyntaxError>) -> Self {
        FormulaValidationResult {
            is_valid: false,
            inferred_type: FormulaType::Unknown,
            syntax_errors: errors,
            unresolved_references: Vec::new(),
            type_errors: Vec::new(),
            info: Vec::new(),
        }
    }

    /// Total number of blocking diagnostics.
    pub fn error_count(&self) -> usize {
        self.syntax_errors.len() + self.unresolved_references.len() + self.type_errors.len()
    }
}

/// Validate formula source against an entity's schema snapshot.
pub fn validate_formula(src: &str, schema: &SchemaSnapshot) -> FormulaValidationResult {
    if src.trim().is_empty() {
        return FormulaValidationResult::empty_formula();
    }
    let result = match parse_formula(src) {
        Ok(expr) => validate_expr(&expr, schema),
        Err(errors) => FormulaValidationResult::syntax(errors),
    };
    tracing::debug!(
        entity = %schema.entity_id,
        valid = result.is_valid,
        errors = result.error_count(),
        "validated formula"
    );
    result
}

/// Validate an already parsed formula.
pub fn validate_expr(expr: &Expr, schema: &SchemaSnapshot) -> FormulaValidationResult {
    let unresolved_references = resolve_references(expr, schema);
    let checked = type_check(expr, schema);
    FormulaValidationResult {
        is_valid: unresolved_references.is_empty() && checked.errors.is_empty(),
        inferred_type: checked.inferred,
        syntax_errors: Vec::new(),
        unresolved_references,
        type_errors: checked.errors,
        info: Vec::new(),
    }
}
