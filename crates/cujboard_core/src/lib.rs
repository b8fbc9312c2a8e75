//! Core persistence and lifecycle logic for cujboard.
//! This crate is the single source of truth for record invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, StoreConfig};
pub use db::{DbError, StoreHandle};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::audit::{AuditAction, AuditEntry};
pub use model::cuj::{Cuj, CujFields};
pub use model::entity::{Entity, Reviewable};
pub use model::hierarchy::{Service, ServiceFields, Team, TeamFields};
pub use model::lifecycle::{HistoryAction, HistoryEntry, Provenance, ReviewState, Status};
pub use model::slo::{Slo, SloFields};
pub use repo::record_store::{
    Document, RecordStore, SqliteRecordStore, StoreError, StoreResult, VersionedRecord,
};
pub use service::lifecycle_service::{
    CreateOptions, LifecycleError, LifecycleResult, LifecycleService,
};
pub use service::snapshot_service::{
    ImportMode, ImportReport, Snapshot, SnapshotError, SnapshotService, SNAPSHOT_FORMAT_VERSION,
};

/// Minimal health-check API for probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
