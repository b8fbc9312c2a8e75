//! Process-wide store handle.
//!
//! # Responsibility
//! - Own the single SQLite connection behind an explicit `open` /
//!   `invalidate` / `close` lifecycle.
//! - Run caller work inside one transaction per scope (`read` / `write`).
//!
//! # Invariants
//! - An invalidated handle re-acquires its connection on the next call.
//! - A closed handle fails every call with `StoreUnavailable`.
//! - `write` commits only when the scope succeeds; any error rolls back.
//! - Waiting for the handle is bounded by the busy timeout and fails with
//!   `Timeout { operation: "acquire_handle" }`.

use super::{open_with_config, DbResult};
use crate::config::StoreConfig;
use crate::repo::record_store::{SqliteRecordStore, StoreError};
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::atomic::{AtomicU64, Ordering};

enum HandleState {
    Open(Connection),
    Invalidated,
    Closed,
}

/// Shared handle to the record store database.
pub struct StoreHandle {
    config: StoreConfig,
    state: Mutex<HandleState>,
    generation: AtomicU64,
}

impl StoreHandle {
    /// Opens and migrates the configured database.
    pub fn open(config: StoreConfig) -> DbResult<Self> {
        let conn = open_with_config(&config)?;
        Ok(Self {
            config,
            state: Mutex::new(HandleState::Open(conn)),
            generation: AtomicU64::new(1),
        })
    }

    /// Opens a private in-memory store with default settings.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of times a connection has been acquired, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), HandleState::Open(_))
    }

    /// Drops the current connection, as on an external version-change
    /// notification. The next call re-acquires a fresh connection.
    ///
    /// In-memory stores lose their contents on re-acquisition.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if matches!(*state, HandleState::Open(_)) {
            *state = HandleState::Invalidated;
            info!(
                "event=store_invalidate module=db status=ok generation={}",
                self.generation()
            );
        }
    }

    /// Final teardown; later calls fail with `StoreUnavailable`.
    pub fn close(&self) {
        *self.state.lock() = HandleState::Closed;
        info!("event=store_close module=db status=ok");
    }

    /// Runs `f` inside a deferred (read) transaction.
    pub fn read<T, E>(&self, f: impl FnOnce(&SqliteRecordStore<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.with_connection(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)
                .map_err(|err| StoreError::from(err).during("begin_read"))?;
            let out = f(&SqliteRecordStore::new(&tx))?;
            tx.finish()
                .map_err(|err| StoreError::from(err).during("end_read"))?;
            Ok(out)
        })
    }

    /// Runs `f` inside one IMMEDIATE transaction so every check and write it
    /// performs is atomic with respect to other writers.
    pub fn write<T, E>(&self, f: impl FnOnce(&SqliteRecordStore<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.with_connection(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(|err| StoreError::from(err).during("begin_write"))?;
            let out = f(&SqliteRecordStore::new(&tx))?;
            tx.commit()
                .map_err(|err| StoreError::from(err).during("commit"))?;
            Ok(out)
        })
    }

    /// Runs `f` against the raw connection, re-acquiring it if invalidated.
    pub fn with_connection<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let wait = self.config.busy_timeout();
        let Some(mut state) = self.state.try_lock_for(wait) else {
            warn!(
                "event=store_acquire module=db status=timeout waited_ms={}",
                wait.as_millis()
            );
            return Err(StoreError::Timeout {
                operation: "acquire_handle",
            }
            .into());
        };

        if matches!(*state, HandleState::Invalidated) {
            match open_with_config(&self.config) {
                Ok(conn) => {
                    *state = HandleState::Open(conn);
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("event=store_reacquire module=db status=ok generation={generation}");
                }
                Err(err) => {
                    warn!("event=store_reacquire module=db status=error error={err}");
                    return Err(StoreError::StoreUnavailable(format!(
                        "failed to re-acquire connection: {err}"
                    ))
                    .into());
                }
            }
        }

        match &*state {
            HandleState::Open(conn) => f(conn),
            HandleState::Closed => {
                Err(StoreError::StoreUnavailable("store handle is closed".to_string()).into())
            }
            HandleState::Invalidated => Err(StoreError::StoreUnavailable(
                "store handle is invalidated".to_string(),
            )
            .into()),
        }
    }
}
