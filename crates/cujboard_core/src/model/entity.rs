//! Traits shared by typed records.
//!
//! # Responsibility
//! - Tie each record type to its collection schema and audit entity type.
//! - Separate editable business fields from provenance and review state, so
//!   field edits cannot reach the status.
//! - Declare parent references and dependent collections for integrity checks.

use super::lifecycle::{Provenance, ReviewState};
use super::schema::CollectionSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Reference from a record to the parent it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef<'a> {
    pub schema: &'static CollectionSchema,
    pub key: &'a str,
    /// Denormalized copy that must match the parent: `(parent field, value)`.
    pub expect: Option<(&'static str, &'a str)>,
}

/// Child collection whose records reference a parent through `foreign_key`.
#[derive(Debug, PartialEq, Eq)]
pub struct DependentRef {
    pub schema: &'static CollectionSchema,
    pub foreign_key: &'static str,
    /// Parent fields the child keeps a copy of. They are frozen while any
    /// child references the parent.
    pub copied_fields: &'static [&'static str],
}

/// A typed record stored in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug {
    /// Editable business fields.
    type Fields: Serialize + Clone + PartialEq + Debug;

    /// Entity type label used in audit entries.
    const KIND: &'static str;

    fn schema() -> &'static CollectionSchema;

    /// Collections that must be empty of references before deletion.
    fn dependents() -> &'static [DependentRef];

    /// Assembles a fresh record. Reviewable records start in `draft` with
    /// empty authors and history.
    fn build(id: String, fields: Self::Fields, provenance: Provenance) -> Self;

    fn id(&self) -> &str;
    fn fields(&self) -> &Self::Fields;
    fn fields_mut(&mut self) -> &mut Self::Fields;
    fn provenance(&self) -> &Provenance;
    fn provenance_mut(&mut self) -> &mut Provenance;

    fn parents(&self) -> Vec<ParentRef<'_>>;

    /// Checks field-level rules. Returns a human-readable message on failure.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn review(&self) -> Option<&ReviewState> {
        None
    }

    fn review_mut(&mut self) -> Option<&mut ReviewState> {
        None
    }
}

/// Records governed by the review lifecycle.
///
/// Implementors return `Some` from `Entity::review` and `Entity::review_mut`.
pub trait Reviewable: Entity {}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("`{field}` must not be blank"));
    }
    Ok(())
}
