//! Typed records and collection schemas.
//!
//! # Responsibility
//! - Define one tagged struct per collection (team, service, CUJ, SLO,
//!   audit entry) with explicit optional fields.
//! - Define the review lifecycle vocabulary shared by reviewable records.
//!
//! # Invariants
//! - Every record is identified by its collection's primary-key field.
//! - Deletion is physical; there is no tombstone state.

pub mod audit;
pub mod cuj;
pub mod entity;
pub mod hierarchy;
pub mod lifecycle;
pub mod schema;
pub mod slo;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
