//! Snapshot export and import.
//!
//! # Responsibility
//! - Serialize every registered collection into one portable document.
//! - Restore documents destructively (full reload) or additively (merge).
//!
//! # Invariants
//! - Imports bypass the lifecycle service; records are written verbatim,
//!   preserving keys, authors and history.
//! - A destructive import validates every record before touching the store
//!   and then runs in one write scope, so it applies fully or not at all.
//! - A merge import never aborts on a single record; each failure is logged
//!   and reported.

use crate::db::StoreHandle;
use crate::model::audit::AuditEntry;
use crate::model::cuj::Cuj;
use crate::model::entity::Entity;
use crate::model::hierarchy::{Service, Team};
use crate::model::now_epoch_ms;
use crate::model::schema::{
    collection_by_name, CollectionSchema, ALL_COLLECTIONS, AUDIT_LOG, CUJS, SERVICES, SLOS, TEAMS,
};
use crate::model::slo::Slo;
use crate::repo::record_store::{Document, RecordStore, StoreError, StoreResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Newest snapshot layout this build reads and the one it writes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug)]
pub enum SnapshotError {
    Store(StoreError),
    UnsupportedFormatVersion {
        found: u64,
        supported: u32,
    },
    UnknownCollection(String),
    /// A record does not match its collection's typed shape.
    InvalidRecord {
        collection: String,
        index: usize,
        message: String,
    },
    Malformed(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::UnsupportedFormatVersion { found, supported } => write!(
                f,
                "snapshot format version {found} is newer than supported version {supported}"
            ),
            Self::UnknownCollection(name) => write!(f, "unknown collection `{name}` in snapshot"),
            Self::InvalidRecord {
                collection,
                index,
                message,
            } => write!(f, "invalid record #{index} in {collection}: {message}"),
            Self::Malformed(message) => write!(f, "malformed snapshot: {message}"),
            Self::Io { path, source } => {
                write!(f, "snapshot file `{}` I/O failed: {source}", path.display())
            }
            Self::Json(err) => write!(f, "snapshot JSON error: {err}"),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SnapshotError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Portable export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub format_version: u32,
    /// Unix epoch milliseconds; `0` for legacy documents.
    #[serde(default)]
    pub exported_at: i64,
    pub collections: BTreeMap<String, Vec<Document>>,
}

impl Snapshot {
    /// Reads a versioned document, or a legacy one whose top-level keys are
    /// collection names (read as version 0, fields untouched).
    pub fn from_json_value(value: Value) -> SnapshotResult<Self> {
        let Value::Object(root) = value else {
            return Err(SnapshotError::Malformed(
                "snapshot root must be an object".to_string(),
            ));
        };

        let Some(version) = root.get("formatVersion") else {
            return legacy_snapshot(root);
        };
        let found = version.as_u64().ok_or_else(|| {
            SnapshotError::Malformed(format!("formatVersion must be a non-negative integer, got {version}"))
        })?;
        if found > u64::from(SNAPSHOT_FORMAT_VERSION) {
            return Err(SnapshotError::UnsupportedFormatVersion {
                found,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(serde_json::from_value(Value::Object(root))?)
    }

    pub fn from_json_str(source: &str) -> SnapshotResult<Self> {
        Self::from_json_value(serde_json::from_str(source)?)
    }

    pub fn to_json_pretty(&self) -> SnapshotResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

fn legacy_snapshot(root: Document) -> SnapshotResult<Snapshot> {
    let mut collections = BTreeMap::new();
    for (name, records) in root {
        let Value::Array(records) = records else {
            return Err(SnapshotError::Malformed(format!(
                "legacy collection `{name}` must be an array"
            )));
        };
        let records = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| match record {
                Value::Object(document) => Ok(document),
                _ => Err(SnapshotError::InvalidRecord {
                    collection: name.clone(),
                    index,
                    message: "record must be an object".to_string(),
                }),
            })
            .collect::<SnapshotResult<Vec<_>>>()?;
        collections.insert(name, records);
    }
    Ok(Snapshot {
        format_version: 0,
        exported_at: 0,
        collections,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Clear each collection present in the document, then recreate it.
    Destructive,
    /// Create new records and overwrite existing keys; keep everything else.
    Merge,
}

/// Record skipped by a merge import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub collection: String,
    pub key: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: Vec<SkippedRecord>,
}

enum MergeOutcome {
    Created,
    Updated,
}

pub struct SnapshotService<'h> {
    handle: &'h StoreHandle,
}

impl<'h> SnapshotService<'h> {
    pub fn new(handle: &'h StoreHandle) -> Self {
        Self { handle }
    }

    /// Reads every registered collection in one read scope.
    pub fn export(&self) -> SnapshotResult<Snapshot> {
        let collections = self
            .handle
            .read(|store| -> SnapshotResult<BTreeMap<String, Vec<Document>>> {
                let mut collections = BTreeMap::new();
                for schema in ALL_COLLECTIONS {
                    collections.insert(schema.name.to_string(), store.all(schema)?);
                }
                Ok(collections)
            })?;

        let snapshot = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            exported_at: now_epoch_ms(),
            collections,
        };
        info!(
            "event=snapshot_export module=snapshot status=ok records={}",
            snapshot.record_count()
        );
        Ok(snapshot)
    }

    pub fn import(&self, snapshot: &Snapshot, mode: ImportMode) -> SnapshotResult<ImportReport> {
        match mode {
            ImportMode::Destructive => self.import_destructive(snapshot),
            ImportMode::Merge => self.import_merge(snapshot),
        }
    }

    /// Replaces every collection present in `snapshot` with its records.
    ///
    /// Collections absent from the document are left untouched.
    pub fn import_destructive(&self, snapshot: &Snapshot) -> SnapshotResult<ImportReport> {
        ensure_supported(snapshot)?;
        if let Some(name) = snapshot
            .collections
            .keys()
            .find(|name| collection_by_name(name).is_none())
        {
            return Err(SnapshotError::UnknownCollection(name.clone()));
        }

        let mut plan: Vec<(&'static CollectionSchema, &Vec<Document>)> = Vec::new();
        for schema in ALL_COLLECTIONS {
            let Some(records) = snapshot.collections.get(schema.name) else {
                continue;
            };
            for (index, record) in records.iter().enumerate() {
                check_shape(schema, record).map_err(|message| SnapshotError::InvalidRecord {
                    collection: schema.name.to_string(),
                    index,
                    message,
                })?;
            }
            plan.push((schema, records));
        }

        let created = self.handle.write(|store| -> SnapshotResult<usize> {
            let mut created = 0;
            for &(schema, records) in &plan {
                store.clear(schema)?;
                for record in records.iter() {
                    store.create(schema, record.clone())?;
                    created += 1;
                }
            }
            Ok(created)
        });

        match created {
            Ok(created) => {
                info!(
                    "event=snapshot_import module=snapshot status=ok mode=destructive collections={} created={}",
                    plan.len(),
                    created
                );
                Ok(ImportReport {
                    created,
                    ..ImportReport::default()
                })
            }
            Err(err) => {
                warn!("event=snapshot_import module=snapshot status=error mode=destructive error={err}");
                Err(err)
            }
        }
    }

    /// Creates or overwrites each record independently.
    ///
    /// Unknown collections and records that fail shape checks or store
    /// constraints are skipped. Only a closed store aborts the import.
    pub fn import_merge(&self, snapshot: &Snapshot) -> SnapshotResult<ImportReport> {
        ensure_supported(snapshot)?;
        let mut report = ImportReport::default();

        for name in snapshot.collections.keys() {
            if collection_by_name(name).is_none() {
                warn!("event=snapshot_import module=snapshot status=skip reason=unknown_collection collection={name}");
                report.skipped.push(SkippedRecord {
                    collection: name.clone(),
                    key: None,
                    reason: "unknown collection".to_string(),
                });
            }
        }

        for schema in ALL_COLLECTIONS {
            let Some(records) = snapshot.collections.get(schema.name) else {
                continue;
            };
            for record in records {
                let key = record
                    .get(schema.primary_key)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let outcome = check_shape(schema, record)
                    .map_err(StoreError::InvalidData)
                    .and_then(|()| self.handle.write(|store| merge_record(store, schema, record)));

                match outcome {
                    Ok(MergeOutcome::Created) => report.created += 1,
                    Ok(MergeOutcome::Updated) => report.updated += 1,
                    Err(err @ StoreError::StoreUnavailable(_)) => return Err(err.into()),
                    Err(err) => {
                        warn!(
                            "event=snapshot_import module=snapshot status=skip collection={} key={} error={}",
                            schema.name,
                            key.as_deref().unwrap_or("-"),
                            err
                        );
                        report.skipped.push(SkippedRecord {
                            collection: schema.name.to_string(),
                            key,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "event=snapshot_import module=snapshot status=ok mode=merge created={} updated={} skipped={}",
            report.created,
            report.updated,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Exports and writes pretty JSON to `path`.
    pub fn export_to_path(&self, path: impl AsRef<Path>) -> SnapshotResult<Snapshot> {
        let path = path.as_ref();
        let snapshot = self.export()?;
        std::fs::write(path, snapshot.to_json_pretty()?).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(snapshot)
    }

    /// Reads a snapshot file and imports it in `mode`.
    pub fn import_from_path(
        &self,
        path: impl AsRef<Path>,
        mode: ImportMode,
    ) -> SnapshotResult<ImportReport> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = Snapshot::from_json_str(&source)?;
        self.import(&snapshot, mode)
    }
}

fn ensure_supported(snapshot: &Snapshot) -> SnapshotResult<()> {
    if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedFormatVersion {
            found: u64::from(snapshot.format_version),
            supported: SNAPSHOT_FORMAT_VERSION,
        });
    }
    Ok(())
}

fn merge_record(
    store: &dyn RecordStore,
    schema: &'static CollectionSchema,
    record: &Document,
) -> StoreResult<MergeOutcome> {
    match store.create(schema, record.clone()) {
        Ok(_) => Ok(MergeOutcome::Created),
        Err(StoreError::DuplicateKey { .. }) => {
            store.update(schema, record.clone())?;
            Ok(MergeOutcome::Updated)
        }
        Err(err) => Err(err),
    }
}

/// Decodes `record` as its collection's typed record and runs field checks.
fn check_shape(schema: &'static CollectionSchema, record: &Document) -> Result<(), String> {
    if std::ptr::eq(schema, &TEAMS) {
        check_entity::<Team>(record)
    } else if std::ptr::eq(schema, &SERVICES) {
        check_entity::<Service>(record)
    } else if std::ptr::eq(schema, &CUJS) {
        check_entity::<Cuj>(record)
    } else if std::ptr::eq(schema, &SLOS) {
        check_entity::<Slo>(record)
    } else if std::ptr::eq(schema, &AUDIT_LOG) {
        serde_json::from_value::<AuditEntry>(Value::Object(record.clone()))
            .map(|_| ())
            .map_err(|err| err.to_string())
    } else {
        Ok(())
    }
}

fn check_entity<E: Entity>(record: &Document) -> Result<(), String> {
    let entity: E =
        serde_json::from_value(Value::Object(record.clone())).map_err(|err| err.to_string())?;
    entity.validate()
}

#[cfg(test)]
mod tests {
    use super::{Snapshot, SnapshotError, SNAPSHOT_FORMAT_VERSION};
    use serde_json::json;

    #[test]
    fn legacy_layout_reads_as_version_zero() {
        let snapshot = Snapshot::from_json_value(json!({
            "teams": [{ "id": "team-1", "name": "Payments" }],
            "slos": []
        }))
        .unwrap();

        assert_eq!(snapshot.format_version, 0);
        assert_eq!(snapshot.exported_at, 0);
        assert_eq!(snapshot.collections["teams"][0]["name"], "Payments");
        assert!(snapshot.collections["slos"].is_empty());
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let err = Snapshot::from_json_value(json!({
            "formatVersion": SNAPSHOT_FORMAT_VERSION + 1,
            "exportedAt": 1,
            "collections": {}
        }))
        .unwrap_err();

        assert!(matches!(
            err,
            SnapshotError::UnsupportedFormatVersion { found, .. }
                if found == u64::from(SNAPSHOT_FORMAT_VERSION) + 1
        ));
    }

    #[test]
    fn non_object_records_are_rejected() {
        let err = Snapshot::from_json_value(json!({ "teams": [1] })).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidRecord { index: 0, .. }));
        let err = Snapshot::from_json_value(json!([])).unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed(_)));
    }
}
