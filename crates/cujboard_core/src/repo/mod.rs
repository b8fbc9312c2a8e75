//! Persistence contracts and SQLite implementations.
//!
//! # Responsibility
//! - Provide the generic record store over named collections.
//! - Provide the referential integrity guard and the audit log on top of it.
//!
//! # Invariants
//! - Primary keys and unique secondary index values never collide
//!   (`DuplicateKey` / `ConstraintViolation`).
//! - Store APIs return semantic errors in addition to DB transport errors.

pub mod audit_log;
pub mod integrity;
pub mod record_store;
