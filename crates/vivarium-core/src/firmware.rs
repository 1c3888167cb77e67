//! Firmware archive ingestion and update negotiation
//!
//! This module provides:
//! - A parser for firmware filenames (`<name>-<libVersion>-<md5>.bin`)
//! - All-or-nothing ingestion of a firmware archive
//! - Version-tag negotiation for monitors polling for updates
//!
//! Each firmware name holds exactly one build. Its version tag is
//! `{name}-{libVersion}-{hash}`, and a monitor that already runs the stored
//! tag is told nothing changed.

use md5::{Digest, Md5};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::store::Store;

/// Largest firmware image accepted (4 MiB)
pub const MAX_FIRMWARE_BYTES: usize = 4 * 1024 * 1024;

/// Length of the hex MD5 digest embedded in filenames
const HASH_LEN: usize = 32;

const FIRMWARE_EXTENSION: &str = ".bin";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{0}' does not end in .bin")]
    Extension(String),
    #[error("'{0}' is not of the form <name>-<version>-<hash>.bin")]
    Shape(String),
    #[error("invalid firmware name in '{0}'")]
    Name(String),
    #[error("invalid library version in '{0}'")]
    Version(String),
    #[error("invalid hash in '{0}'")]
    Hash(String),
}

impl From<ParseError> for CoreError {
    fn from(err: ParseError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

/// Metadata carried in a firmware filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFirmwareName {
    pub name: String,
    pub lib_version: String,
    /// Lower-cased hex digest
    pub hash: String,
}

/// Parse a firmware filename.
///
/// Any directory prefix is dropped first; only the basename has to match
/// `<name:\w+>-<version:(\d+\.)*\d+>-<hash:[0-9a-fA-F]{32}>\.bin`.
pub fn parse_firmware_filename(filename: &str) -> Result<ParsedFirmwareName, ParseError> {
    let basename = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);

    let stem = basename
        .strip_suffix(FIRMWARE_EXTENSION)
        .ok_or_else(|| ParseError::Extension(basename.to_string()))?;

    // Neither the name nor the version may contain '-', so a valid stem
    // splits into exactly three parts.
    let mut parts = stem.split('-');
    let (Some(name), Some(version), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Shape(basename.to_string()));
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::Name(basename.to_string()));
    }
    if !is_lib_version(version) {
        return Err(ParseError::Version(basename.to_string()));
    }
    if hash.len() != HASH_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::Hash(basename.to_string()));
    }

    Ok(ParsedFirmwareName {
        name: name.to_string(),
        lib_version: version.to_string(),
        hash: hash.to_ascii_lowercase(),
    })
}

/// `(\d+\.)*\d+`
fn is_lib_version(version: &str) -> bool {
    version
        .split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Compose the version tag for a firmware build
pub fn version_tag(name: &str, lib_version: &str, hash: &str) -> String {
    format!("{}-{}-{}", name, lib_version, hash)
}

/// Compute the MD5 digest of data as a lower-case hex string
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// How the filename hash is checked against the image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashPolicy {
    /// Compute the MD5 of the bytes and reject the archive on mismatch
    #[default]
    Verify,
    /// Accept the filename hash as-is
    TrustFilename,
}

/// One file from a firmware archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub filename: String,
    pub content: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// A stored firmware build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareFile {
    pub name: String,
    pub lib_version: String,
    pub hash: String,
    pub blob: Vec<u8>,
}

impl FirmwareFile {
    pub fn version(&self) -> String {
        version_tag(&self.name, &self.lib_version, &self.hash)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            lib_version: row.get(1)?,
            hash: row.get(2)?,
            blob: row.get(3)?,
        })
    }
}

/// Firmware metadata as returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareMetadata {
    pub name: String,
    pub lib_version: String,
    pub hash: String,
    pub version: String,
}

/// Result of comparing a monitor's version tag with the stored build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareOffer {
    /// No firmware with that name
    NotFound,
    /// The monitor already runs the stored build
    NotModified,
    /// A different build is stored; send it
    Download { file_name: String, blob: Vec<u8> },
}

/// Names touched by one archive ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ArchiveReport {
    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.unchanged.len()
    }
}

/// Firmware validated and ready to write
struct PendingFirmware<'e> {
    parsed: ParsedFirmwareName,
    content: &'e [u8],
}

/// Repository for [`FirmwareFile`] records
pub struct FirmwareRepository<'a> {
    store: &'a Store,
    hash_policy: HashPolicy,
}

impl<'a> FirmwareRepository<'a> {
    pub fn new(store: &'a Store, hash_policy: HashPolicy) -> Self {
        Self { store, hash_policy }
    }

    /// Ingest every entry of an archive.
    ///
    /// All entries are validated before anything is written, and the writes
    /// share one transaction: either the whole archive lands or none of it.
    pub fn add_firmware_archive(&self, entries: &[ArchiveEntry]) -> CoreResult<ArchiveReport> {
        let pending = entries
            .iter()
            .map(|entry| self.validate(entry))
            .collect::<CoreResult<Vec<_>>>()?;

        let report = self.store.transaction(|tx| {
            let mut report = ArchiveReport::default();
            for firmware in &pending {
                apply_in(tx, firmware, &mut report)?;
            }
            Ok(report)
        })?;

        info!(
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            "Ingested firmware archive"
        );
        Ok(report)
    }

    fn validate<'e>(&self, entry: &'e ArchiveEntry) -> CoreResult<PendingFirmware<'e>> {
        let parsed = parse_firmware_filename(&entry.filename)?;

        if entry.content.len() > MAX_FIRMWARE_BYTES {
            return Err(CoreError::validation(format!(
                "'{}' is {} bytes, limit is {}",
                entry.filename,
                entry.content.len(),
                MAX_FIRMWARE_BYTES
            )));
        }

        if self.hash_policy == HashPolicy::Verify {
            let actual = md5_hex(&entry.content);
            if actual != parsed.hash {
                return Err(CoreError::validation(format!(
                    "'{}' hash mismatch: filename says {}, content is {}",
                    entry.filename, parsed.hash, actual
                )));
            }
        }

        Ok(PendingFirmware {
            parsed,
            content: &entry.content,
        })
    }

    pub fn get(&self, name: &str) -> CoreResult<Option<FirmwareFile>> {
        self.store.transaction(|tx| fetch_in(tx, name))
    }

    pub fn metadata(&self, name: &str) -> CoreResult<Option<FirmwareMetadata>> {
        self.store.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT name, lib_version, hash FROM firmware WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(name, lib_version, hash)| FirmwareMetadata {
                version: version_tag(&name, &lib_version, &hash),
                name,
                lib_version,
                hash,
            }))
        })
    }

    /// All known firmware names, sorted
    pub fn list_names(&self) -> CoreResult<Vec<String>> {
        self.store.transaction(|tx| {
            let mut stmt = tx.prepare("SELECT name FROM firmware ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    /// Decide what a monitor holding `current_version` should receive
    pub fn negotiate(&self, name: &str, current_version: &str) -> CoreResult<FirmwareOffer> {
        let Some(firmware) = self.get(name)? else {
            return Ok(FirmwareOffer::NotFound);
        };
        let version = firmware.version();
        if version == current_version {
            debug!(firmware = %name, version = %version, "Firmware not modified");
            return Ok(FirmwareOffer::NotModified);
        }
        Ok(FirmwareOffer::Download {
            file_name: format!("{}.bin", version),
            blob: firmware.blob,
        })
    }
}

fn fetch_in(tx: &Transaction<'_>, name: &str) -> CoreResult<Option<FirmwareFile>> {
    let firmware = tx
        .query_row(
            "SELECT name, lib_version, hash, firmware FROM firmware WHERE name = ?1",
            params![name],
            FirmwareFile::from_row,
        )
        .optional()?;
    Ok(firmware)
}

fn apply_in(
    tx: &Transaction<'_>,
    firmware: &PendingFirmware<'_>,
    report: &mut ArchiveReport,
) -> CoreResult<()> {
    let ParsedFirmwareName { name, lib_version, hash } = &firmware.parsed;
    let new_version = version_tag(name, lib_version, hash);

    let stored: Option<(String, String)> = tx
        .query_row(
            "SELECT lib_version, hash FROM firmware WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match stored {
        None => {
            tx.execute(
                "INSERT INTO firmware (name, lib_version, hash, firmware) VALUES (?1, ?2, ?3, ?4)",
                params![name, lib_version, hash, firmware.content],
            )?;
            info!(firmware = %name, version = %new_version, "Added firmware");
            report.inserted.push(name.clone());
        }
        Some((old_lib, old_hash)) if version_tag(name, &old_lib, &old_hash) != new_version => {
            tx.execute(
                "UPDATE firmware SET lib_version = ?1, hash = ?2, firmware = ?3 WHERE name = ?4",
                params![lib_version, hash, firmware.content, name],
            )?;
            info!(
                firmware = %name,
                from = %version_tag(name, &old_lib, &old_hash),
                to = %new_version,
                "Updated firmware"
            );
            report.updated.push(name.clone());
        }
        Some(_) => {
            debug!(firmware = %name, version = %new_version, "Firmware unchanged");
            report.unchanged.push(name.clone());
        }
    }
    Ok(())
}
