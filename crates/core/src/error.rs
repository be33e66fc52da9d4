//! Design-time diagnostics.
//!
//! Every diagnostic is plain data: the validator collects them instead of
//! stopping at the first one, and result DTOs carry them to the caller.

use serde::Serialize;

use crate::ast::Span;
use crate::schema::FormulaType;

/// Which stage rejected the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxErrorKind {
    /// The tokenizer met a character or literal it cannot lex.
    Lexical,
    /// The token stream does not match the grammar.
    Grammar,
}

/// A lexical or grammatical error, positioned by byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    pub found: String,
    pub message: String,
}

impl SyntaxError {
    pub fn lexical(offset: usize, found: impl Into<String>, message: impl Into<String>) -> Self {
        SyntaxError {
            kind: SyntaxErrorKind::Lexical,
            offset,
            expected: None,
            found: found.into(),
            message: message.into(),
        }
    }

    pub fn unexpected(offset: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        let expected = expected.into();
        let found = found.into();
        SyntaxError {
            kind: SyntaxErrorKind::Grammar,
            offset,
            message: format!("expected {}, found {}", expected, found),
            expected: Some(expected),
            found,
        }
    }

    pub fn grammar(offset: usize, found: impl Into<String>, message: impl Into<String>) -> Self {
        SyntaxError {
            kind: SyntaxErrorKind::Grammar,
            offset,
            expected: None,
            found: found.into(),
            message: message.into(),
        }
    }
}

/// An operand or argument whose type does not fit the operator or function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("type error: {message}")]
pub struct TypeError {
    pub span: Span,
    pub expected: String,
    pub found: String,
    pub message: String,
}

impl TypeError {
    pub fn mismatch(span: Span, expected: impl Into<String>, found: FormulaType, context: &str) -> Self {
        let expected = expected.into();
        TypeError {
            span,
            message: format!("{} expects {}, got {}", context, expected, found),
            expected,
            found: found.to_string(),
        }
    }
}

/// Why a field reference could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No field with that id exists in the entity.
    UnknownField,
    /// The reference is qualified with another entity.
    CrossEntity,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::UnknownField => write!(f, "field is not declared in this entity"),
            UnresolvedReason::CrossEntity => {
                write!(f, "references to other entities are not supported")
            }
        }
    }
}

/// A field reference that does not name a field of the formula's own entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("unresolved reference '{reference}': {reason}")]
pub struct UnresolvedReference {
    pub field_id: String,
    /// Source text of the reference, including any entity qualifier.
    pub reference: String,
    pub reason: UnresolvedReason,
    pub span: Span,
}

/// Severity attached to reported findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}
