//! Telemetry ingestion
//!
//! Monitors push one JSON object per sample. [`StatsSample::from_json`]
//! checks that every field is present and well-typed, and
//! [`IngestionEngine`] writes the sample together with the node sighting in
//! a single transaction.
//!
//! Rows are keyed by the `entry_id` surrogate key. Identical timestamps from
//! different monitors are therefore stored side by side, and timestamps are
//! kept exactly as reported.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::node::{upsert_seen_in, NodeId};
use crate::store::Store;

/// Payload keys, paired with the snake_case spelling used by older firmware
const KEY_ID: (&str, &str) = ("id", "id");
const KEY_TIMESTAMP: (&str, &str) = ("timestamp", "timestamp");
const KEY_HIGH_TEMP: (&str, &str) = ("highTemp", "high_temp");
const KEY_LOW_TEMP: (&str, &str) = ("lowTemp", "low_temp");
const KEY_AIR_TEMP: (&str, &str) = ("airTemp", "air_temp");
const KEY_HUMIDITY: (&str, &str) = ("humidity", "humidity");
const KEY_DIGITAL_1: (&str, &str) = ("digital1", "digital_1");
const KEY_DIGITAL_2: (&str, &str) = ("digital2", "digital_2");
const KEY_ANALOG: (&str, &str) = ("analog", "analog");

/// Offset layouts accepted in addition to RFC 3339 (`+hhmm` style offsets)
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Layouts without an offset
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A validated telemetry sample, ready to store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub high_temp: Option<f64>,
    pub low_temp: Option<f64>,
    pub air_temp: Option<f64>,
    pub humidity: Option<f64>,
    pub digital1: i64,
    pub digital2: i64,
    pub analog: i64,
}

impl StatsSample {
    /// Validate a pushed JSON object
    pub fn from_json(payload: &Map<String, Value>) -> CoreResult<Self> {
        // Presence is checked for every key before any value is interpreted
        for key in [
            KEY_ID,
            KEY_TIMESTAMP,
            KEY_HIGH_TEMP,
            KEY_LOW_TEMP,
            KEY_AIR_TEMP,
            KEY_HUMIDITY,
            KEY_DIGITAL_1,
            KEY_DIGITAL_2,
            KEY_ANALOG,
        ] {
            field(payload, key)?;
        }

        Ok(Self {
            id: NodeId(integer(payload, KEY_ID)?),
            timestamp: timestamp(payload)?,
            high_temp: reading(payload, KEY_HIGH_TEMP)?,
            low_temp: reading(payload, KEY_LOW_TEMP)?,
            air_temp: reading(payload, KEY_AIR_TEMP)?,
            humidity: reading(payload, KEY_HUMIDITY)?,
            digital1: integer(payload, KEY_DIGITAL_1)?,
            digital2: integer(payload, KEY_DIGITAL_2)?,
            analog: integer(payload, KEY_ANALOG)?,
        })
    }
}

fn field<'p>(payload: &'p Map<String, Value>, key: (&str, &str)) -> CoreResult<&'p Value> {
    payload
        .get(key.0)
        .or_else(|| payload.get(key.1))
        .ok_or_else(|| CoreError::validation(format!("'{}' not in payload", key.0)))
}

fn integer(payload: &Map<String, Value>, key: (&str, &str)) -> CoreResult<i64> {
    field(payload, key)?
        .as_i64()
        .ok_or_else(|| CoreError::validation(format!("'{}' must be an integer", key.0)))
}

fn reading(payload: &Map<String, Value>, key: (&str, &str)) -> CoreResult<Option<f64>> {
    match field(payload, key)? {
        Value::Null => Ok(None),
        value => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| CoreError::validation(format!("'{}' must be a number or null", key.0))),
    }
}

fn timestamp(payload: &Map<String, Value>) -> CoreResult<DateTime<Utc>> {
    let raw = field(payload, KEY_TIMESTAMP)?
        .as_str()
        .ok_or_else(|| CoreError::validation("'timestamp' must be an ISO-8601 string"))?;
    parse_timestamp(raw)
}

/// Parse an ISO-8601 timestamp and normalize it to UTC.
///
/// Values without an offset are taken to be UTC, and a bare date means
/// midnight.
pub fn parse_timestamp(raw: &str) -> CoreResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
    {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CoreError::validation(format!("invalid timestamp '{raw}'")))
}

/// A stored telemetry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsInstance {
    /// Surrogate key assigned by the store
    pub entry_id: i64,
    #[serde(flatten)]
    pub sample: StatsSample,
}

impl StatsInstance {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entry_id: row.get(0)?,
            sample: StatsSample {
                id: NodeId(row.get(1)?),
                timestamp: row.get(2)?,
                high_temp: row.get(3)?,
                low_temp: row.get(4)?,
                air_temp: row.get(5)?,
                humidity: row.get(6)?,
                digital1: row.get(7)?,
                digital2: row.get(8)?,
                analog: row.get(9)?,
            },
        })
    }
}

/// Writes telemetry samples and the node sightings that come with them
pub struct IngestionEngine<'a> {
    store: &'a Store,
}

impl<'a> IngestionEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Validate and store a pushed JSON object
    pub fn ingest(&self, payload: &Map<String, Value>, source_ip: Option<&str>) -> CoreResult<i64> {
        let sample = StatsSample::from_json(payload)?;
        self.ingest_sample(&sample, source_ip)
    }

    /// Store an already-validated sample, returning its surrogate key
    pub fn ingest_sample(&self, sample: &StatsSample, source_ip: Option<&str>) -> CoreResult<i64> {
        self.store.transaction(|tx| {
            upsert_seen_in(tx, sample.id, source_ip)?;
            tx.execute(
                "INSERT INTO stats_entries
                    (id, timestamp, high_temp, low_temp, air_temp, humidity,
                     digital_1, digital_2, analog)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    sample.id.0,
                    sample.timestamp,
                    sample.high_temp,
                    sample.low_temp,
                    sample.air_temp,
                    sample.humidity,
                    sample.digital1,
                    sample.digital2,
                    sample.analog,
                ],
            )?;
            let entry_id = tx.last_insert_rowid();
            debug!(node = %sample.id, entry_id, timestamp = %sample.timestamp, "Stored stats sample");
            Ok(entry_id)
        })
    }

    /// Number of stored samples
    pub fn count(&self) -> CoreResult<u64> {
        self.store.transaction(|tx| {
            let count: i64 = tx.query_row("SELECT COUNT(entry_id) FROM stats_entries", [], |r| r.get(0))?;
            Ok(count as u64)
        })
    }

    /// All samples from one node, oldest entry first
    pub fn samples_for(&self, id: NodeId) -> CoreResult<Vec<StatsInstance>> {
        self.store.transaction(|tx| {
            let mut stmt = tx.prepare(
                "SELECT entry_id, id, timestamp, high_temp, low_temp, air_temp, humidity,
                        digital_1, digital_2, analog
                 FROM stats_entries WHERE id = ?1 ORDER BY entry_id",
            )?;
            let rows = stmt
                .query_map(params![id.0], StatsInstance::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
