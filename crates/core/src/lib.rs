//! formula-core: the design-time half of the formula engine.
//!
//! Lexes and parses formulas that reference sibling fields of one entity,
//! type-checks them against a schema snapshot, resolves their references,
//! and builds the per-entity dependency graph used for cycle detection and
//! evaluation ordering. Everything here is synchronous, pure and
//! deterministic.
//!
//! # Public API
//!
//! - [`validate_formula()`] -- full diagnostics for one formula
//! - [`parse_formula()`] / [`CompiledFormula`] -- source to AST
//! - [`type_check()`] -- result type inference
//! - [`resolve_references()`] / [`collect_references()`] -- field references
//! - [`DependencyGraph`] -- dependency edges, cycles, evaluation order
//! - [`SchemaSnapshot`] / [`FormulaType`] -- caller-supplied schema
//! - [`ControlRule`] / [`EffectType`] -- control rule data model

pub mod ast;
pub mod control;
pub mod error;
pub mod functions;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod schema;
pub mod typecheck;
pub mod validate;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{BinaryOp, Expr, ExprKind, FieldRef, Literal, Span, UnaryOp};
pub use control::{control_links, ControlRule, EffectType};
pub use error::{
    Severity, SyntaxError, SyntaxErrorKind, TypeError, UnresolvedReason, UnresolvedReference,
};
pub use functions::Function;
pub use graph::{CycleReport, DependencyEdge, DependencyGraph};
pub use schema::{FieldDefinition, FormulaType, SchemaSnapshot};
pub use validate::FormulaValidationResult;

// ── Convenience re-exports: entry points ─────────────────────────────

pub use lexer::lex;
pub use parser::{parse, parse_formula, CompiledFormula};
pub use resolve::{collect_references, resolve_references};
pub use typecheck::{type_check, TypeCheck};
pub use validate::{validate_expr, validate_formula};
