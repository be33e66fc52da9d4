//! Schema snapshot supplied by the caller.
//!
//! A point-in-time, read-only copy of one entity's field declarations. The
//! engine never mutates or persists it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type of a formula or declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormulaType {
    Number,
    Text,
    Boolean,
    Date,
    /// Empty or invalid formula. A terminal state, not an error by itself.
    Unknown,
}

impl FormulaType {
    pub fn is_unknown(self) -> bool {
        self == FormulaType::Unknown
    }

    /// Whether `<`, `<=`, `>`, `>=` are defined on this type.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            FormulaType::Number | FormulaType::Text | FormulaType::Date | FormulaType::Unknown
        )
    }
}

impl fmt::Display for FormulaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormulaType::Number => "NUMBER",
            FormulaType::Text => "TEXT",
            FormulaType::Boolean => "BOOLEAN",
            FormulaType::Date => "DATE",
            FormulaType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Declaration of one field of the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub field_type: FormulaType,
    #[serde(default)]
    pub is_calculated: bool,
    /// Formula source for calculated fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl FieldDefinition {
    pub fn input(field_type: FormulaType) -> Self {
        FieldDefinition {
            field_type,
            is_calculated: false,
            formula: None,
        }
    }

    pub fn calculated(field_type: FormulaType, formula: impl Into<String>) -> Self {
        FieldDefinition {
            field_type,
            is_calculated: true,
            formula: Some(formula.into()),
        }
    }
}

/// Field declarations of a single entity, keyed by field id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub entity_id: String,
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl SchemaSnapshot {
    pub fn new(entity_id: impl Into<String>) -> Self {
        SchemaSnapshot {
            entity_id: entity_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insertion, convenient for tests and adapters.
    pub fn with_field(mut self, field_id: impl Into<String>, def: FieldDefinition) -> Self {
        self.fields.insert(field_id.into(), def);
        self
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.get(field_id)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.fields.contains_key(field_id)
    }

    pub fn field_type(&self, field_id: &str) -> Option<FormulaType> {
        self.fields.get(field_id).map(|f| f.field_type)
    }

    pub fn is_calculated(&self, field_id: &str) -> bool {
        self.fields.get(field_id).is_some_and(|f| f.is_calculated)
    }

    /// Calculated fields in field-id order.
    pub fn calculated_fields(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields
            .iter()
            .filter(|(_, def)| def.is_calculated)
            .map(|(id, def)| (id.as_str(), def))
    }

    /// Parse a snapshot from its JSON form:
    /// `{"entity_id": "...", "fields": {"id": {"field_type": "NUMBER", ...}}}`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        SchemaSnapshot::deserialize(json)
    }
}
