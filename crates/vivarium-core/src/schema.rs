//! Table layout and legacy schema upgrade
//!
//! Early deployments keyed `stats_entries` on `timestamp` alone, which
//! collides whenever two monitors report within the same clock tick. The
//! current layout adds an `entry_id` surrogate key. [`SchemaMigrator`]
//! detects the old layout and rebuilds the table in place, preserving rows.

use rusqlite::Transaction;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoreResult;
use crate::store::Store;

const STATS_TABLE: &str = "stats_entries";

/// Shadow table used while rebuilding `stats_entries`
const STATS_SHADOW_TABLE: &str = "stats_entries_migration";

/// Columns carried over from the legacy layout, in copy order
const STATS_COLUMNS: &str =
    "id, timestamp, high_temp, low_temp, air_temp, humidity, digital_1, digital_2, analog";

const CREATE_NODES: &str = "CREATE TABLE IF NOT EXISTS nodes (
    id      INTEGER PRIMARY KEY,
    name    VARCHAR(255) NOT NULL,
    last_ip VARCHAR(64)
)";

const CREATE_FIRMWARE: &str = "CREATE TABLE IF NOT EXISTS firmware (
    name        VARCHAR(255) PRIMARY KEY,
    lib_version VARCHAR(64) NOT NULL,
    hash        CHAR(32) NOT NULL,
    firmware    BLOB NOT NULL
)";

fn create_stats_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            entry_id  INTEGER PRIMARY KEY AUTOINCREMENT,
            id        INTEGER NOT NULL,
            timestamp DATETIME NOT NULL,
            high_temp FLOAT,
            low_temp  FLOAT,
            air_temp  FLOAT,
            humidity  FLOAT,
            digital_1 INTEGER,
            digital_2 INTEGER,
            analog    INTEGER
        )"
    )
}

/// Outcome of [`SchemaMigrator::ensure_current_schema`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    /// The store already had the current layout
    Current,
    /// The legacy telemetry table was rebuilt
    Migrated { rows: u64 },
}

/// Brings a store up to the current layout
pub struct SchemaMigrator<'a> {
    store: &'a Store,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Create missing tables and upgrade a legacy telemetry table.
    ///
    /// Must finish before any ingestion runs against the store.
    pub fn ensure_current_schema(&self) -> CoreResult<SchemaStatus> {
        self.store.transaction(|tx| {
            tx.execute_batch(CREATE_NODES)?;
            tx.execute_batch(CREATE_FIRMWARE)?;
            tx.execute_batch(&create_stats_sql(STATS_TABLE))?;

            if let Err(e) = probe_surrogate_key(tx) {
                debug!(error = %e, "Surrogate key probe failed");
                let rows = migrate_stats_table(tx)?;
                info!(rows, "Migrated legacy stats table to surrogate key layout");
                return Ok(SchemaStatus::Migrated { rows });
            }

            debug!("Schema is current");
            Ok(SchemaStatus::Current)
        })
    }
}

fn probe_surrogate_key(tx: &Transaction<'_>) -> rusqlite::Result<i64> {
    tx.query_row(
        &format!("SELECT COUNT(entry_id) FROM {STATS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

/// Rebuild `stats_entries` with the surrogate key, keeping row order
fn migrate_stats_table(tx: &Transaction<'_>) -> CoreResult<u64> {
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {STATS_SHADOW_TABLE}"))?;
    tx.execute_batch(&create_stats_sql(STATS_SHADOW_TABLE))?;
    let rows = tx.execute(
        &format!(
            "INSERT INTO {STATS_SHADOW_TABLE} ({STATS_COLUMNS})
             SELECT {STATS_COLUMNS} FROM {STATS_TABLE} ORDER BY rowid"
        ),
        [],
    )?;
    tx.execute_batch(&format!(
        "DROP TABLE {STATS_TABLE};
         ALTER TABLE {STATS_SHADOW_TABLE} RENAME TO {STATS_TABLE};"
    ))?;
    Ok(rows as u64)
}
