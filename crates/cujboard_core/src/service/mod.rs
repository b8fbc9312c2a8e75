//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate record store, integrity guard and audit log calls into
//!   lifecycle and snapshot operations.
//! - Keep callers decoupled from storage details.
//!
//! # Invariants
//! - Each operation's reads, checks and writes share one write scope.
//! - Audit appends run after the primary write commits.

pub mod lifecycle_service;
pub mod snapshot_service;
