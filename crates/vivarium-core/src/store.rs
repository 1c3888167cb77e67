//! SQLite storage handle
//!
//! A [`Store`] owns a single connection behind a mutex. Cloning the store
//! clones the handle, not the connection, so every component shares the same
//! database. All work happens through [`Store::transaction`], which commits
//! when the closure returns `Ok` and rolls back otherwise.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Busy timeout for file-backed databases
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the storage engine
#[derive(Clone)]
pub struct Store {
    connection: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> CoreResult<Self> {
        let connection = Connection::open(path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            connection.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
        info!(path = %path.display(), journal_mode = %journal_mode, "Opened database");
        Ok(Self::from_connection(connection))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> CoreResult<Self> {
        let connection = Connection::open_in_memory()?;
        debug!("Opened in-memory database");
        Ok(Self::from_connection(connection))
    }

    /// Open a database from a configured location; `:memory:` selects an
    /// in-memory store
    pub fn open_location(location: &str) -> CoreResult<Self> {
        if location == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(Path::new(location))
        }
    }

    fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    /// Run `f` inside one transaction.
    ///
    /// The write lock is taken up front, so other connections to the same
    /// file wait on the busy timeout instead of failing mid-transaction.
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut guard = self.connection.lock().map_err(|_| CoreError::Poisoned)?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
