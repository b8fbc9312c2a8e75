//! Referential integrity guard.
//!
//! # Responsibility
//! - Reject deletion of a parent while child records still reference it.
//!
//! # Invariants
//! - Deletion is rejected, never cascaded.
//! - The guard only reads; callers run it in the same write scope as the
//!   delete it protects so no child can be inserted in between.

use crate::model::entity::DependentRef;
use crate::model::schema::CollectionSchema;
use crate::repo::record_store::{RecordStore, StoreError};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type IntegrityResult<T> = Result<T, IntegrityError>;

#[derive(Debug)]
pub enum IntegrityError {
    HasDependents {
        child_collection: &'static str,
        foreign_key: String,
        parent_key: String,
        count: usize,
    },
    Store(StoreError),
}

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HasDependents {
                child_collection,
                foreign_key,
                parent_key,
                count,
            } => write!(
                f,
                "{parent_key} still has {count} dependent record(s) in {child_collection}.{foreign_key}"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IntegrityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::HasDependents { .. } => None,
        }
    }
}

impl From<StoreError> for IntegrityError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Pre-delete dependency check over a record store.
pub struct IntegrityGuard<'s> {
    store: &'s dyn RecordStore,
}

impl<'s> IntegrityGuard<'s> {
    pub fn new(store: &'s dyn RecordStore) -> Self {
        Self { store }
    }

    /// Fails with `HasDependents` when any record in `child` references
    /// `parent_key` through the `foreign_key` index.
    pub fn assert_no_children(
        &self,
        child: &'static CollectionSchema,
        foreign_key: &str,
        parent_key: &str,
    ) -> IntegrityResult<()> {
        let count = self
            .store
            .count(child, foreign_key, &Value::String(parent_key.to_string()))?;
        if count > 0 {
            return Err(IntegrityError::HasDependents {
                child_collection: child.name,
                foreign_key: foreign_key.to_string(),
                parent_key: parent_key.to_string(),
                count,
            });
        }
        Ok(())
    }

    /// Runs `assert_no_children` for every dependent collection in order.
    pub fn assert_no_dependents(
        &self,
        parent_key: &str,
        dependents: &[DependentRef],
    ) -> IntegrityResult<()> {
        for dependent in dependents {
            self.assert_no_children(dependent.schema, dependent.foreign_key, parent_key)?;
        }
        Ok(())
    }
}
