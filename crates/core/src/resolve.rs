//! Reference resolution: which fields a formula reads, and whether each
//! exists in the formula's own entity.

use std::collections::BTreeSet;

use crate::ast::Expr;
use crate::error::{UnresolvedReason, UnresolvedReference};
use crate::schema::SchemaSnapshot;

/// The set of same-entity field ids read by a formula.
///
/// References qualified with another entity are not included; they can
/// never resolve and are reported by [`resolve_references`].
pub fn collect_references(expr: &Expr, entity_id: &str) -> BTreeSet<String> {
    expr.field_refs()
        .into_iter()
        .filter(|(r, _)| r.entity.as_deref().map_or(true, |e| e == entity_id))
        .map(|(r, _)| r.field_id.clone())
        .collect()
}

/// Every reference that does not name a field of `schema`'s entity, in
/// source order. Repeated references are each reported with their own span.
pub fn resolve_references(expr: &Expr, schema: &SchemaSnapshot) -> Vec<UnresolvedReference> {
    let mut unresolved = Vec::new();
    for (r, span) in expr.field_refs() {
        let reason = match r.entity.as_deref() {
            Some(entity) if entity != schema.entity_id => Some(UnresolvedReason::CrossEntity),
            _ if !schema.contains(&r.field_id) => Some(UnresolvedReason::UnknownField),
            _ => None,
        };
        if let Some(reason) = reason {
            unresolved.push(UnresolvedReference {
                field_id: r.field_id.clone(),
                reference: r.to_string(),
                reason,
                span,
            });
        }
    }
    unresolved
}
