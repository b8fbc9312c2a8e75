//! Entity lifecycle service.
//!
//! # Responsibility
//! - The sanctioned create/update/transition/delete path for tracked records.
//! - Stamp provenance, accumulate authors and append history entries.
//! - Validate parent references on write and dependents on delete.
//!
//! # Invariants
//! - `update_fields` only sees the editable field group, so it can never
//!   change status; `transition_status` is the only status writer.
//! - Every field-changing update appends exactly one `updated` entry; every
//!   transition appends exactly one `status_changed` entry.
//! - Reads, checks and the write of one operation run in one IMMEDIATE
//!   transaction; concurrent operations cannot interleave between them.
//! - Audit append failures are logged and never undo the primary write.

use crate::db::StoreHandle;
use crate::model::audit::{AuditAction, AuditEntry};
use crate::model::entity::{DependentRef, Entity, Reviewable};
use crate::model::lifecycle::{HistoryEntry, Provenance, Status};
use crate::model::now_epoch_ms;
use crate::model::schema::CollectionSchema;
use crate::repo::audit_log::AuditLog;
use crate::repo::integrity::{IntegrityError, IntegrityGuard};
use crate::repo::record_store::{
    decode_record, encode_record, generate_key, Document, RecordStore, StoreError,
};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors from lifecycle operations.
#[derive(Debug)]
pub enum LifecycleError {
    /// Record store failure, including `NotFound` for missing records or
    /// missing parents.
    Store(StoreError),
    /// Delete rejected because child records still reference the target.
    HasDependents {
        child_collection: &'static str,
        foreign_key: String,
        parent_key: String,
        count: usize,
    },
    /// Status change not allowed by the transition table. `from` is `None`
    /// for an invalid initial status at create time.
    InvalidTransition {
        collection: &'static str,
        key: String,
        from: Option<Status>,
        to: Status,
    },
    DenialReasonRequired {
        collection: &'static str,
        key: String,
    },
    Validation {
        collection: &'static str,
        key: String,
        message: String,
    },
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::HasDependents {
                child_collection,
                foreign_key,
                parent_key,
                count,
            } => write!(
                f,
                "cannot delete {parent_key}: {count} dependent record(s) in {child_collection}.{foreign_key}"
            ),
            Self::InvalidTransition {
                collection,
                key,
                from: Some(from),
                to,
            } => write!(f, "invalid transition for {collection}/{key}: {from} -> {to}"),
            Self::InvalidTransition {
                collection,
                key,
                from: None,
                to,
            } => write!(
                f,
                "{collection}/{key} cannot be created with status {to}; it must be reached by a transition"
            ),
            Self::DenialReasonRequired { collection, key } => {
                write!(f, "denying {collection}/{key} requires a reason")
            }
            Self::Validation {
                collection,
                key,
                message,
            } => write!(f, "invalid {collection}/{key}: {message}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<IntegrityError> for LifecycleError {
    fn from(value: IntegrityError) -> Self {
        match value {
            IntegrityError::HasDependents {
                child_collection,
                foreign_key,
                parent_key,
                count,
            } => Self::HasDependents {
                child_collection,
                foreign_key,
                parent_key,
                count,
            },
            IntegrityError::Store(err) => Self::Store(err),
        }
    }
}

/// Optional knobs for record creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Caller-chosen primary key; generated when absent.
    pub id: Option<String>,
    /// Initial status for reviewable records; `draft` when absent.
    pub initial_status: Option<Status>,
}

/// Lifecycle facade over one store handle.
pub struct LifecycleService<'h> {
    handle: &'h StoreHandle,
}

impl<'h> LifecycleService<'h> {
    pub fn new(handle: &'h StoreHandle) -> Self {
        Self { handle }
    }

    /// Creates a record in `draft` (when reviewable) with a generated key.
    pub fn create_entity<E: Entity>(&self, fields: E::Fields, actor: &str) -> LifecycleResult<E> {
        self.create_entity_with(fields, CreateOptions::default(), actor)
    }

    /// Creates a record after checking that every referenced parent exists.
    ///
    /// # Contract
    /// - Initial status must be `draft`, `experimental` or `inactive`.
    /// - `authors = [actor]` and one `created` history entry for reviewable
    ///   records.
    /// - Emits a `create` audit entry.
    pub fn create_entity_with<E: Entity>(
        &self,
        fields: E::Fields,
        options: CreateOptions,
        actor: &str,
    ) -> LifecycleResult<E> {
        let schema = E::schema();
        let id = match options.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                let prefix = schema.key_prefix.ok_or(StoreError::MissingKey {
                    collection: schema.name,
                    field: schema.primary_key,
                })?;
                generate_key(prefix)
            }
        };
        let actor = normalize_actor(schema, &id, actor)?;

        let now = now_epoch_ms();
        let mut entity = E::build(id.clone(), fields, Provenance::new(actor, now));
        match (entity.review_mut(), options.initial_status) {
            (Some(review), initial) => {
                let status = initial.unwrap_or(Status::Draft);
                if !status.is_valid_initial() {
                    return Err(LifecycleError::InvalidTransition {
                        collection: schema.name,
                        key: id,
                        from: None,
                        to: status,
                    });
                }
                review.status = status;
                review.add_author(actor);
                review.append(HistoryEntry::created(actor, now, status));
            }
            (None, Some(status)) => {
                return Err(LifecycleError::Validation {
                    collection: schema.name,
                    key: id,
                    message: format!("records in {} carry no status, got {status}", schema.name),
                });
            }
            (None, None) => {}
        }
        validate_entity(&entity)?;

        let document = encode_record(&entity)?;
        self.handle.write(|store| -> LifecycleResult<()> {
            ensure_parents(store, &entity)?;
            store.create(schema, document)?;
            Ok(())
        })?;

        let status = entity.review().map(|review| review.status);
        info!(
            "event=entity_create module=lifecycle status=ok collection={} key={} actor={}",
            schema.name, id, actor
        );
        self.record_audit(
            E::KIND,
            &id,
            AuditAction::Create,
            actor,
            json!({ "status": status }),
        );
        Ok(entity)
    }

    /// Loads one record.
    pub fn get<E: Entity>(&self, key: &str) -> LifecycleResult<E> {
        let schema = E::schema();
        self.handle.read(|store| -> LifecycleResult<E> {
            Ok(decode_record(schema, store.get(schema, key)?)?)
        })
    }

    /// Every record of one type, in insertion order.
    pub fn list<E: Entity>(&self) -> LifecycleResult<Vec<E>> {
        let schema = E::schema();
        self.handle.read(|store| -> LifecycleResult<Vec<E>> {
            decode_all(schema, store.all(schema)?)
        })
    }

    /// Records whose indexed `field` holds `value`.
    pub fn find_by<E: Entity>(&self, field: &str, value: &Value) -> LifecycleResult<Vec<E>> {
        let schema = E::schema();
        self.handle.read(|store| -> LifecycleResult<Vec<E>> {
            decode_all(schema, store.query(schema, field, value)?)
        })
    }

    pub fn list_by_status<E: Reviewable>(&self, status: Status) -> LifecycleResult<Vec<E>> {
        self.find_by(
            "status",
            &Value::String(status.as_str().to_string()),
        )
    }

    pub fn list_authored_by<E: Reviewable>(&self, actor: &str) -> LifecycleResult<Vec<E>> {
        self.find_by("authors", &Value::String(actor.to_string()))
    }

    /// Applies `mutator` to the editable fields of one record.
    ///
    /// # Contract
    /// - No field change: nothing is written and no history, author or audit
    ///   entry is added.
    /// - Otherwise one `updated` history entry naming the changed fields,
    ///   `actor` added to authors, provenance stamped, `update` audit entry.
    /// - A field that dependents copy cannot change while any dependent
    ///   references the record.
    pub fn update_fields<E: Entity>(
        &self,
        key: &str,
        actor: &str,
        mutator: impl FnOnce(&mut E::Fields),
    ) -> LifecycleResult<E> {
        let schema = E::schema();
        let actor = normalize_actor(schema, key, actor)?;

        let (entity, changed) =
            self.handle
                .write(|store| -> LifecycleResult<(E, Vec<String>)> {
                    let mut entity: E = decode_record(schema, store.get(schema, key)?)?;
                    let before = entity.fields().clone();
                    mutator(entity.fields_mut());
                    let changed = changed_fields(&before, entity.fields())?;
                    if changed.is_empty() {
                        return Ok((entity, changed));
                    }

                    validate_entity(&entity)?;
                    ensure_parents(store, &entity)?;
                    ensure_copies_unchanged::<E>(store, key, &changed)?;

                    let now = now_epoch_ms();
                    entity.provenance_mut().touch(actor, now);
                    if let Some(review) = entity.review_mut() {
                        review.add_author(actor);
                        review.append(HistoryEntry::updated(actor, now, changed.clone()));
                    }
                    store.update(schema, encode_record(&entity)?)?;
                    Ok((entity, changed))
                })?;

        if changed.is_empty() {
            debug!(
                "event=entity_update module=lifecycle status=noop collection={} key={}",
                schema.name, key
            );
            return Ok(entity);
        }

        info!(
            "event=entity_update module=lifecycle status=ok collection={} key={} actor={} changed={}",
            schema.name,
            key,
            actor,
            changed.join(",")
        );
        self.record_audit(
            E::KIND,
            key,
            AuditAction::Update,
            actor,
            json!({ "changedFields": changed }),
        );
        Ok(entity)
    }

    /// Moves one reviewable record to `target`.
    ///
    /// # Contract
    /// - `target` must be allowed from the current status.
    /// - `denied` requires a non-blank `reason`, kept in the history detail.
    /// - Audit action is `approve` / `reject` for approvals and denials,
    ///   `update` otherwise.
    pub fn transition_status<E: Reviewable>(
        &self,
        key: &str,
        target: Status,
        actor: &str,
        reason: Option<&str>,
    ) -> LifecycleResult<E> {
        let schema = E::schema();
        let actor = normalize_actor(schema, key, actor)?;
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);
        if target == Status::Denied && reason.is_none() {
            return Err(LifecycleError::DenialReasonRequired {
                collection: schema.name,
                key: key.to_string(),
            });
        }

        let (entity, from) = self.handle.write(|store| -> LifecycleResult<(E, Status)> {
            let mut entity: E = decode_record(schema, store.get(schema, key)?)?;
            let from = entity
                .review()
                .ok_or_else(|| missing_review(schema, key))?
                .status;
            if !from.can_transition_to(target) {
                return Err(LifecycleError::InvalidTransition {
                    collection: schema.name,
                    key: key.to_string(),
                    from: Some(from),
                    to: target,
                });
            }

            let now = now_epoch_ms();
            entity.provenance_mut().touch(actor, now);
            let review = entity
                .review_mut()
                .ok_or_else(|| missing_review(schema, key))?;
            review.status = target;
            review.add_author(actor);
            review.append(HistoryEntry::status_changed(
                actor,
                now,
                from,
                target,
                reason.clone(),
            ));
            store.update(schema, encode_record(&entity)?)?;
            Ok((entity, from))
        })?;

        let action = match target {
            Status::Approved => AuditAction::Approve,
            Status::Denied => AuditAction::Reject,
            _ => AuditAction::Update,
        };
        info!(
            "event=entity_transition module=lifecycle status=ok collection={} key={} actor={} from={} to={}",
            schema.name, key, actor, from, target
        );
        self.record_audit(
            E::KIND,
            key,
            action,
            actor,
            json!({ "fromStatus": from, "toStatus": target, "reason": reason }),
        );
        Ok(entity)
    }

    /// Reason attached to the newest transition into `denied`, if any.
    pub fn latest_denial_reason<E: Reviewable>(&self, key: &str) -> LifecycleResult<Option<String>> {
        let entity: E = self.get(key)?;
        let review = entity
            .review()
            .ok_or_else(|| missing_review(E::schema(), key))?;
        Ok(review.latest_denial_reason().map(str::to_string))
    }

    /// Deletes one record after checking its declared dependents.
    pub fn delete_entity<E: Entity>(&self, key: &str, actor: &str) -> LifecycleResult<()> {
        self.delete_record(E::schema(), E::KIND, key, E::dependents(), actor)
    }

    /// Deletes one record of `schema` unless a record in any of `dependents`
    /// still references it. Emits a `delete` audit entry on success.
    pub fn delete_record(
        &self,
        schema: &'static CollectionSchema,
        entity_type: &str,
        key: &str,
        dependents: &[DependentRef],
        actor: &str,
    ) -> LifecycleResult<()> {
        let actor = normalize_actor(schema, key, actor)?;
        self.handle.write(|store| -> LifecycleResult<()> {
            store.get(schema, key)?;
            IntegrityGuard::new(store).assert_no_dependents(key, dependents)?;
            store.delete(schema, key)?;
            Ok(())
        })?;

        info!(
            "event=entity_delete module=lifecycle status=ok collection={} key={} actor={}",
            schema.name, key, actor
        );
        self.record_audit(
            entity_type,
            key,
            AuditAction::Delete,
            actor,
            json!({ "collection": schema.name }),
        );
        Ok(())
    }

    /// Audit entries for one record id, oldest first.
    pub fn audit_trail(&self, entity_id: &str) -> LifecycleResult<Vec<AuditEntry>> {
        self.handle.read(|store| -> LifecycleResult<Vec<AuditEntry>> {
            Ok(AuditLog::new(store).for_entity(entity_id)?)
        })
    }

    /// Newest audit entries across all records.
    pub fn recent_audit(&self, limit: usize) -> LifecycleResult<Vec<AuditEntry>> {
        self.handle.read(|store| -> LifecycleResult<Vec<AuditEntry>> {
            Ok(AuditLog::new(store).recent(limit)?)
        })
    }

    fn record_audit(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        actor: &str,
        detail: Value,
    ) {
        let appended = self
            .handle
            .write(|store| AuditLog::new(store).append(entity_type, entity_id, action, actor, detail));
        if let Err(err) = appended {
            warn!(
                "event=audit_append module=lifecycle status=error entity_type={} entity_id={} action={} error={}",
                entity_type,
                entity_id,
                action.as_str(),
                err
            );
        }
    }
}

fn ensure_parents<E: Entity>(store: &dyn RecordStore, entity: &E) -> LifecycleResult<()> {
    for parent in entity.parents() {
        let document = store.get(parent.schema, parent.key)?;
        if let Some((field, expected)) = parent.expect {
            let actual = document.get(field).and_then(Value::as_str);
            if actual != Some(expected) {
                return Err(LifecycleError::Validation {
                    collection: E::schema().name,
                    key: entity.id().to_string(),
                    message: format!(
                        "{field} `{expected}` does not match {}/{} ({})",
                        parent.schema.name,
                        parent.key,
                        actual.unwrap_or("unset")
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Rejects a change to a field that dependents keep a copy of while any
/// dependent still references `key`.
fn ensure_copies_unchanged<E: Entity>(
    store: &dyn RecordStore,
    key: &str,
    changed: &[String],
) -> LifecycleResult<()> {
    for dependent in E::dependents() {
        let Some(field) = dependent
            .copied_fields
            .iter()
            .find(|field| changed.iter().any(|name| name == *field))
        else {
            continue;
        };
        let count = store.count(
            dependent.schema,
            dependent.foreign_key,
            &Value::String(key.to_string()),
        )?;
        if count > 0 {
            return Err(LifecycleError::Validation {
                collection: E::schema().name,
                key: key.to_string(),
                message: format!(
                    "{field} is copied by {count} record(s) in {}; move or delete them first",
                    dependent.schema.name
                ),
            });
        }
    }
    Ok(())
}

fn missing_review(schema: &'static CollectionSchema, key: &str) -> LifecycleError {
    LifecycleError::Validation {
        collection: schema.name,
        key: key.to_string(),
        message: "record carries no review state".to_string(),
    }
}

fn validate_entity<E: Entity>(entity: &E) -> LifecycleResult<()> {
    entity
        .validate()
        .map_err(|message| LifecycleError::Validation {
            collection: E::schema().name,
            key: entity.id().to_string(),
            message,
        })
}

fn normalize_actor<'a>(
    schema: &'static CollectionSchema,
    key: &str,
    actor: &'a str,
) -> LifecycleResult<&'a str> {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        return Err(LifecycleError::Validation {
            collection: schema.name,
            key: key.to_string(),
            message: "actor must not be blank".to_string(),
        });
    }
    Ok(trimmed)
}

fn decode_all<E: Entity>(
    schema: &'static CollectionSchema,
    documents: Vec<Document>,
) -> LifecycleResult<Vec<E>> {
    documents
        .into_iter()
        .map(|document| decode_record(schema, document).map_err(LifecycleError::from))
        .collect()
}

/// Names of top-level fields whose serialized value differs.
fn changed_fields<F: Serialize>(before: &F, after: &F) -> LifecycleResult<Vec<String>> {
    let before = encode_record(before)?;
    let after = encode_record(after)?;
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    Ok(names
        .into_iter()
        .filter(|name| before.get(name.as_str()) != after.get(name.as_str()))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::changed_fields;
    use crate::model::cuj::CujFields;

    #[test]
    fn changed_fields_lists_only_differing_names() {
        let before = CujFields {
            name: "checkout".into(),
            service_id: "svc-1".into(),
            ..CujFields::default()
        };
        let mut after = before.clone();
        after.description = "pay for a basket".into();
        after.owner = Some("carol".into());

        let changed = changed_fields(&before, &after).unwrap();
        assert_eq!(changed, vec!["description".to_string(), "owner".to_string()]);
        assert!(changed_fields(&before, &before).unwrap().is_empty());
    }
}
