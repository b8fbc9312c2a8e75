//! Generic record store over named collections.
//!
//! # Responsibility
//! - Durable CRUD for JSON documents grouped by collection.
//! - Maintain materialized secondary index entries and enforce unique ones.
//! - Generate `{prefix}-{epoch_ms}-{NNNN}` keys for collections that own
//!   key generation.
//!
//! # Invariants
//! - Each write runs inside one IMMEDIATE transaction, or inside the caller's
//!   open transaction when there is one, so existence/uniqueness checks and
//!   the write are atomic.
//! - Key collisions surface as `DuplicateKey`; rows are never overwritten by
//!   `create`.
//! - `version` starts at 1 and increases by one on every update.

use crate::db::{is_busy_error, DbError};
use crate::model::now_epoch_ms;
use crate::model::schema::CollectionSchema;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque structured document stored in a collection.
pub type Document = Map<String, Value>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store error taxonomy.
#[derive(Debug)]
pub enum StoreError {
    NotFound {
        collection: &'static str,
        key: String,
    },
    DuplicateKey {
        collection: &'static str,
        key: String,
    },
    /// A unique secondary index value is already held by another record.
    ConstraintViolation {
        collection: &'static str,
        field: &'static str,
        value: String,
        existing_key: String,
    },
    /// Primary-key field absent and the collection does not generate keys.
    MissingKey {
        collection: &'static str,
        field: &'static str,
    },
    UnknownIndex {
        collection: &'static str,
        field: String,
    },
    /// Optimistic update lost against a concurrent writer.
    VersionConflict {
        collection: &'static str,
        key: String,
        expected: i64,
        actual: i64,
    },
    /// The database stayed locked past the configured busy timeout.
    Timeout {
        operation: &'static str,
    },
    /// Handle closed, or re-acquisition after invalidation failed.
    StoreUnavailable(String),
    InvalidData(String),
    Serialization(serde_json::Error),
    Db(DbError),
}

impl StoreError {
    /// Tags a timeout with the store operation that hit it.
    pub fn during(self, operation: &'static str) -> Self {
        match self {
            Self::Timeout { .. } => Self::Timeout { operation },
            other => other,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { collection, key } => {
                write!(f, "record not found: {collection}/{key}")
            }
            Self::DuplicateKey { collection, key } => {
                write!(f, "duplicate key: {collection}/{key} already exists")
            }
            Self::ConstraintViolation {
                collection,
                field,
                value,
                existing_key,
            } => write!(
                f,
                "unique index {collection}.{field} already holds `{value}` (record {existing_key})"
            ),
            Self::MissingKey { collection, field } => write!(
                f,
                "record for {collection} is missing primary key field `{field}`"
            ),
            Self::UnknownIndex { collection, field } => {
                write!(f, "collection {collection} has no index on `{field}`")
            }
            Self::VersionConflict {
                collection,
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {collection}/{key}: expected {expected}, found {actual}"
            ),
            Self::Timeout { operation } => {
                write!(f, "store operation `{operation}` timed out waiting for a lock")
            }
            Self::StoreUnavailable(reason) => write!(f, "store unavailable: {reason}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::Serialization(err) => write!(f, "record serialization failed: {err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) if is_busy_error(&err) => Self::Timeout { operation: "sqlite" },
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// A record together with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRecord {
    pub record: Document,
    pub version: i64,
}

/// Durable CRUD over named collections.
pub trait RecordStore {
    /// Inserts a new record and returns its primary key.
    fn create(&self, schema: &'static CollectionSchema, record: Document) -> StoreResult<String>;
    fn get(&self, schema: &'static CollectionSchema, key: &str) -> StoreResult<Document>;
    fn get_versioned(
        &self,
        schema: &'static CollectionSchema,
        key: &str,
    ) -> StoreResult<VersionedRecord>;
    /// Replaces an existing record in full.
    fn update(&self, schema: &'static CollectionSchema, record: Document) -> StoreResult<Document>;
    /// Replaces an existing record only if its version is still
    /// `expected_version`.
    fn update_if_version(
        &self,
        schema: &'static CollectionSchema,
        record: Document,
        expected_version: i64,
    ) -> StoreResult<VersionedRecord>;
    fn delete(&self, schema: &'static CollectionSchema, key: &str) -> StoreResult<()>;
    /// Records whose indexed `field` holds `value`, in insertion order.
    fn query(
        &self,
        schema: &'static CollectionSchema,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>>;
    fn count(&self, schema: &'static CollectionSchema, field: &str, value: &Value)
        -> StoreResult<usize>;
    /// Every record in the collection, in insertion order.
    fn all(&self, schema: &'static CollectionSchema) -> StoreResult<Vec<Document>>;
    /// Removes every record in the collection; returns how many were removed.
    fn clear(&self, schema: &'static CollectionSchema) -> StoreResult<usize>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn create(&self, schema: &'static CollectionSchema, mut record: Document) -> StoreResult<String> {
        let key = match primary_key_of(schema, &record)? {
            Some(key) => key,
            None => {
                let prefix = schema.key_prefix.ok_or(StoreError::MissingKey {
                    collection: schema.name,
                    field: schema.primary_key,
                })?;
                let key = generate_key(prefix);
                record.insert(schema.primary_key.to_string(), Value::String(key.clone()));
                key
            }
        };

        let entries = index_entries(schema, &record)?;
        let body = serde_json::to_string(&record)?;
        with_write_scope(self.conn, |conn| {
            if record_version(conn, schema, &key)?.is_some() {
                return Err(StoreError::DuplicateKey {
                    collection: schema.name,
                    key: key.clone(),
                });
            }
            ensure_unique(conn, schema, &key, &entries)?;
            conn.execute(
                "INSERT INTO records (collection, record_key, body, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4);",
                params![schema.name, key.as_str(), body, now_epoch_ms()],
            )?;
            insert_index_entries(conn, schema, &key, &entries)
        })
        .map_err(|err| err.during("create"))?;

        Ok(key)
    }

    fn get(&self, schema: &'static CollectionSchema, key: &str) -> StoreResult<Document> {
        self.get_versioned(schema, key).map(|found| found.record)
    }

    fn get_versioned(
        &self,
        schema: &'static CollectionSchema,
        key: &str,
    ) -> StoreResult<VersionedRecord> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT body, version
                 FROM records
                 WHERE collection = ?1
                   AND record_key = ?2;",
                params![schema.name, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| StoreError::from(err).during("get"))?;

        match row {
            Some((body, version)) => Ok(VersionedRecord {
                record: parse_body(schema, key, &body)?,
                version,
            }),
            None => Err(StoreError::NotFound {
                collection: schema.name,
                key: key.to_string(),
            }),
        }
    }

    fn update(&self, schema: &'static CollectionSchema, record: Document) -> StoreResult<Document> {
        let key = require_primary_key(schema, &record)?;
        with_write_scope(self.conn, |conn| {
            replace_record(conn, schema, &key, &record, None)
        })
        .map_err(|err| err.during("update"))?;
        Ok(record)
    }

    fn update_if_version(
        &self,
        schema: &'static CollectionSchema,
        record: Document,
        expected_version: i64,
    ) -> StoreResult<VersionedRecord> {
        let key = require_primary_key(schema, &record)?;
        let version = with_write_scope(self.conn, |conn| {
            replace_record(conn, schema, &key, &record, Some(expected_version))
        })
        .map_err(|err| err.during("update"))?;
        Ok(VersionedRecord { record, version })
    }

    fn delete(&self, schema: &'static CollectionSchema, key: &str) -> StoreResult<()> {
        with_write_scope(self.conn, |conn| {
            conn.execute(
                "DELETE FROM record_index_entries WHERE collection = ?1 AND record_key = ?2;",
                params![schema.name, key],
            )?;
            let changed = conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND record_key = ?2;",
                params![schema.name, key],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    collection: schema.name,
                    key: key.to_string(),
                });
            }
            Ok(())
        })
        .map_err(|err| err.during("delete"))
    }

    fn query(
        &self,
        schema: &'static CollectionSchema,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        let lookup = index_lookup_value(schema, field, value)?;
        let Some(lookup) = lookup else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT r.record_key, r.body
             FROM records r
             INNER JOIN record_index_entries e
                ON e.collection = r.collection
               AND e.record_key = r.record_key
             WHERE e.collection = ?1
               AND e.field = ?2
               AND e.value = ?3
             ORDER BY r.seq ASC;",
        )?;
        let mut rows = stmt
            .query(params![schema.name, field, lookup])
            .map_err(|err| StoreError::from(err).during("query"))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let body: String = row.get(1)?;
            records.push(parse_body(schema, &key, &body)?);
        }
        Ok(records)
    }

    fn count(
        &self,
        schema: &'static CollectionSchema,
        field: &str,
        value: &Value,
    ) -> StoreResult<usize> {
        let Some(lookup) = index_lookup_value(schema, field, value)? else {
            return Ok(0);
        };
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT record_key)
                 FROM record_index_entries
                 WHERE collection = ?1
                   AND field = ?2
                   AND value = ?3;",
                params![schema.name, field, lookup],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(err).during("count"))?;
        usize::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative index count `{count}`")))
    }

    fn all(&self, schema: &'static CollectionSchema) -> StoreResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_key, body
             FROM records
             WHERE collection = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt
            .query([schema.name])
            .map_err(|err| StoreError::from(err).during("all"))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let body: String = row.get(1)?;
            records.push(parse_body(schema, &key, &body)?);
        }
        Ok(records)
    }

    fn clear(&self, schema: &'static CollectionSchema) -> StoreResult<usize> {
        with_write_scope(self.conn, |conn| {
            conn.execute(
                "DELETE FROM record_index_entries WHERE collection = ?1;",
                [schema.name],
            )?;
            let removed = conn.execute("DELETE FROM records WHERE collection = ?1;", [schema.name])?;
            Ok(removed)
        })
        .map_err(|err| err.during("clear"))
    }
}

static LAST_KEY_MS: AtomicI64 = AtomicI64::new(0);

/// Generates a `{prefix}-{epoch_ms}-{NNNN}` key.
///
/// The timestamp part is strictly increasing within one process, so only
/// keys minted by different processes can collide.
pub fn generate_key(prefix: &str) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{prefix}-{}-{suffix:04}", next_key_timestamp())
}

fn next_key_timestamp() -> i64 {
    let now = now_epoch_ms();
    let previous = LAST_KEY_MS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

/// Serializes a typed record into a store document.
pub fn encode_record<T: Serialize>(record: &T) -> StoreResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "record must serialize to an object, got {other}"
        ))),
    }
}

/// Deserializes a store document into a typed record.
pub fn decode_record<T: DeserializeOwned>(
    schema: &CollectionSchema,
    document: Document,
) -> StoreResult<T> {
    let key = document
        .get(schema.primary_key)
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    serde_json::from_value(Value::Object(document)).map_err(|err| {
        StoreError::InvalidData(format!("{}/{key} does not match record shape: {err}", schema.name))
    })
}

/// Runs `f` atomically: inside a new IMMEDIATE transaction when `conn` is in
/// autocommit mode, otherwise inside the caller's open transaction.
fn with_write_scope<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> StoreResult<T>,
) -> StoreResult<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

#[derive(Debug)]
struct IndexEntry {
    field: &'static str,
    value: String,
    unique: bool,
}

fn replace_record(
    conn: &Connection,
    schema: &'static CollectionSchema,
    key: &str,
    record: &Document,
    expected_version: Option<i64>,
) -> StoreResult<i64> {
    let current = record_version(conn, schema, key)?.ok_or_else(|| StoreError::NotFound {
        collection: schema.name,
        key: key.to_string(),
    })?;
    if let Some(expected) = expected_version {
        if expected != current {
            return Err(StoreError::VersionConflict {
                collection: schema.name,
                key: key.to_string(),
                expected,
                actual: current,
            });
        }
    }

    let entries = index_entries(schema, record)?;
    ensure_unique(conn, schema, key, &entries)?;
    let next_version = current + 1;
    conn.execute(
        "UPDATE records
         SET body = ?3,
             version = ?4,
             updated_at = ?5
         WHERE collection = ?1
           AND record_key = ?2;",
        params![
            schema.name,
            key,
            serde_json::to_string(record)?,
            next_version,
            now_epoch_ms()
        ],
    )?;
    conn.execute(
        "DELETE FROM record_index_entries WHERE collection = ?1 AND record_key = ?2;",
        params![schema.name, key],
    )?;
    insert_index_entries(conn, schema, key, &entries)?;
    Ok(next_version)
}

fn record_version(
    conn: &Connection,
    schema: &CollectionSchema,
    key: &str,
) -> StoreResult<Option<i64>> {
    let version = conn
        .query_row(
            "SELECT version FROM records WHERE collection = ?1 AND record_key = ?2;",
            params![schema.name, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

fn ensure_unique(
    conn: &Connection,
    schema: &'static CollectionSchema,
    key: &str,
    entries: &[IndexEntry],
) -> StoreResult<()> {
    for entry in entries.iter().filter(|entry| entry.unique) {
        let holder: Option<String> = conn
            .query_row(
                "SELECT record_key
                 FROM record_index_entries
                 WHERE collection = ?1
                   AND field = ?2
                   AND value = ?3
                   AND record_key <> ?4
                 LIMIT 1;",
                params![schema.name, entry.field, entry.value.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_key) = holder {
            return Err(StoreError::ConstraintViolation {
                collection: schema.name,
                field: entry.field,
                value: entry.value.clone(),
                existing_key,
            });
        }
    }
    Ok(())
}

fn insert_index_entries(
    conn: &Connection,
    schema: &CollectionSchema,
    key: &str,
    entries: &[IndexEntry],
) -> StoreResult<()> {
    for entry in entries {
        conn.execute(
            "INSERT OR IGNORE INTO record_index_entries (collection, field, value, record_key, is_unique)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                schema.name,
                entry.field,
                entry.value.as_str(),
                key,
                i64::from(entry.unique)
            ],
        )?;
    }
    Ok(())
}

fn index_entries(schema: &CollectionSchema, record: &Document) -> StoreResult<Vec<IndexEntry>> {
    let mut entries: Vec<IndexEntry> = Vec::new();
    for index in schema.indexes {
        let values: Vec<&Value> = match record.get(index.field) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
        };
        for value in values {
            let Some(text) = index_value_text(value) else {
                return Err(StoreError::InvalidData(format!(
                    "{}.{} holds a value that cannot be indexed: {value}",
                    schema.name, index.field
                )));
            };
            if index.unique
                && entries
                    .iter()
                    .any(|entry| entry.field == index.field && entry.value == text)
            {
                continue;
            }
            entries.push(IndexEntry {
                field: index.field,
                value: text,
                unique: index.unique,
            });
        }
    }
    Ok(entries)
}

fn index_lookup_value(
    schema: &'static CollectionSchema,
    field: &str,
    value: &Value,
) -> StoreResult<Option<String>> {
    if schema.index(field).is_none() {
        return Err(StoreError::UnknownIndex {
            collection: schema.name,
            field: field.to_string(),
        });
    }
    Ok(index_value_text(value))
}

fn index_value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn primary_key_of(schema: &'static CollectionSchema, record: &Document) -> StoreResult<Option<String>> {
    match record.get(schema.primary_key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(key)) if key.trim().is_empty() => Ok(None),
        Some(Value::String(key)) => Ok(Some(key.clone())),
        Some(other) => Err(StoreError::InvalidData(format!(
            "{}.{} must be a string, got {other}",
            schema.name, schema.primary_key
        ))),
    }
}

fn require_primary_key(schema: &'static CollectionSchema, record: &Document) -> StoreResult<String> {
    primary_key_of(schema, record)?.ok_or(StoreError::MissingKey {
        collection: schema.name,
        field: schema.primary_key,
    })
}

fn parse_body(schema: &CollectionSchema, key: &str, body: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::InvalidData(format!(
            "{}/{key} body is not a JSON object",
            schema.name
        ))),
        Err(err) => Err(StoreError::InvalidData(format!(
            "{}/{key} body is not valid JSON: {err}",
            schema.name
        ))),
    }
}
