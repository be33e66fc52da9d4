//! JSON deserialization of the analysis input.
//!
//! An analysis bundle is one entity's schema snapshot plus the control
//! rules authored against it:
//!
//! ```json
//! {
//!   "schema": {"entity_id": "order", "fields": {"total": {"field_type": "NUMBER"}}},
//!   "control_rules": [ ... ]
//! }
//! ```

use std::fmt;

use formula_core::{ControlRule, SchemaSnapshot};
use serde::{Deserialize, Serialize};

/// Error type for analysis operations.
#[derive(Debug, Clone)]
pub enum AnalysisError {
    /// The bundle JSON is invalid or missing required members.
    InvalidBundle(String),
    /// An analysis name passed to `analyze_selected` is not known.
    UnknownAnalysis(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::InvalidBundle(msg) => write!(f, "invalid bundle: {}", msg),
            AnalysisError::UnknownAnalysis(name) => write!(f, "unknown analysis '{}'", name),
        }
    }
}

impl std::error::Error for AnalysisError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub schema: SchemaSnapshot,
    #[serde(default)]
    pub control_rules: Vec<ControlRule>,
}

impl AnalysisBundle {
    pub fn new(schema: SchemaSnapshot, control_rules: Vec<ControlRule>) -> Self {
        AnalysisBundle {
            schema,
            control_rules,
        }
    }

    pub fn from_json(bundle: &serde_json::Value) -> Result<Self, AnalysisError> {
        AnalysisBundle::deserialize(bundle).map_err(|e| AnalysisError::InvalidBundle(e.to_string()))
    }
}
