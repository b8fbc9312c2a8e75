//! Append-only audit log over the `audit_log` collection.
//!
//! # Responsibility
//! - Record who did what to which record, independent of record history.
//! - Serve per-entity trails in insertion (chronological) order.
//!
//! # Invariants
//! - Entries are only ever created; this module exposes no update/delete.

use crate::model::audit::{AuditAction, AuditEntry};
use crate::model::now_epoch_ms;
use crate::model::schema::AUDIT_LOG;
use crate::repo::record_store::{
    decode_record, encode_record, generate_key, RecordStore, StoreResult,
};
use serde_json::Value;

pub struct AuditLog<'s> {
    store: &'s dyn RecordStore,
}

impl<'s> AuditLog<'s> {
    pub fn new(store: &'s dyn RecordStore) -> Self {
        Self { store }
    }

    /// Appends one entry and returns its id.
    pub fn append(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        detail: Value,
    ) -> StoreResult<String> {
        let entry = AuditEntry {
            id: generate_key(AUDIT_LOG.key_prefix.unwrap_or("audit")),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action,
            actor: actor.to_string(),
            timestamp: now_epoch_ms(),
            detail,
        };
        self.store.create(&AUDIT_LOG, encode_record(&entry)?)
    }

    /// Entries for one record id, oldest first.
    pub fn for_entity(&self, entity_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.store
            .query(&AUDIT_LOG, "entityId", &Value::String(entity_id.to_string()))?
            .into_iter()
            .map(|document| decode_record(&AUDIT_LOG, document))
            .collect()
    }

    /// Newest `limit` entries across every record, newest first.
    pub fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let documents = self.store.all(&AUDIT_LOG)?;
        documents
            .into_iter()
            .rev()
            .take(limit)
            .map(|document| decode_record(&AUDIT_LOG, document))
            .collect()
    }
}
