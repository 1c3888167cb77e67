//! Remote firmware archive fetching
//!
//! This module handles:
//! 1. Downloading the firmware archive from the configured URL
//! 2. Unpacking the ZIP in memory into archive entries
//! 3. Handing the entries to the core for all-or-nothing ingestion

use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use vivarium_core::firmware::MAX_FIRMWARE_BYTES;
use vivarium_core::{ArchiveEntry, ArchiveReport};

use crate::state::AppState;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Failed to read archive entry '{name}': {source}")]
    Read {
        name: String,
        source: std::io::Error,
    },
}

/// Firmware archive downloader
pub struct FirmwareFetcher {
    /// HTTP client
    client: reqwest::Client,
    /// Archive location
    url: String,
}

impl FirmwareFetcher {
    /// Create a new firmware fetcher
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download and unpack the archive
    pub async fn fetch_archive(&self) -> Result<Vec<ArchiveEntry>> {
        debug!(url = %self.url, "Fetching firmware archive");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to download firmware archive")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Firmware archive download failed with status {}",
                response.status()
            );
        }

        let data = response
            .bytes()
            .await
            .context("Failed to read firmware archive body")?;

        let entries = extract_archive(&data)?;
        info!(url = %self.url, size = data.len(), entries = entries.len(), "Downloaded firmware archive");
        Ok(entries)
    }

    /// Fetch the archive and ingest it
    pub async fn refresh(&self, state: &AppState) -> Result<ArchiveReport> {
        let entries = self.fetch_archive().await?;
        let report = state
            .run(move |core| core.firmware().add_firmware_archive(&entries))
            .await?;
        Ok(report)
    }
}

/// Unpack a ZIP archive held in memory.
///
/// Directory entries are skipped. Each file is read up to one byte past the
/// firmware size limit so oversized images fail validation without being
/// inflated in full.
pub fn extract_archive(data: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut content = Vec::new();
        file.take(MAX_FIRMWARE_BYTES as u64 + 1)
            .read_to_end(&mut content)
            .map_err(|source| ArchiveError::Read {
                name: name.clone(),
                source,
            })?;
        entries.push(ArchiveEntry::new(name, content));
    }

    Ok(entries)
}

/// One scheduled refresh; failures are logged and left for the next run
pub async fn scheduled_refresh(fetcher: Arc<FirmwareFetcher>, state: Arc<AppState>) {
    match fetcher.refresh(&state).await {
        Ok(report) => info!(
            url = %fetcher.url(),
            total = report.total(),
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            "Firmware refresh complete"
        ),
        Err(e) => warn!(url = %fetcher.url(), error = %e, "Firmware refresh failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use vivarium_core::firmware::md5_hex;
    use vivarium_core::{CoreOptions, Vivarium};
    use zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("release/", options).unwrap();
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_archive() {
        let name = format!("release/fw1-1.2.3-{}.bin", md5_hex(b"111"));
        let data = build_zip(&[(name.as_str(), &b"111"[..]), ("readme.txt", &b"hi"[..])]);

        let entries = extract_archive(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].filename, name);
        assert_eq!(entries[0].content, b"111");
        assert_eq!(entries[1].filename, "readme.txt");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(matches!(
            extract_archive(b"definitely not a zip"),
            Err(ArchiveError::Zip(_))
        ));
    }

    #[test]
    fn test_extracted_archive_ingests() {
        let names: Vec<String> = [&b"111"[..], &b"222"[..]]
            .iter()
            .enumerate()
            .map(|(i, data)| format!("fw{}-1.{}-{}.bin", i + 1, i, md5_hex(data)))
            .collect();
        let data = build_zip(&[
            (names[0].as_str(), &b"111"[..]),
            (names[1].as_str(), &b"222"[..]),
        ]);

        let core = Vivarium::in_memory(CoreOptions::default()).unwrap();
        let state = AppState::with_core(core, Config::default());
        let entries = extract_archive(&data).unwrap();
        let report = state.core.firmware().add_firmware_archive(&entries).unwrap();
        assert_eq!(report.inserted, vec!["fw1", "fw2"]);
    }

    #[test]
    fn test_fetcher_builds() {
        let fetcher =
            FirmwareFetcher::new("http://127.0.0.1:9/fw.zip", Duration::from_secs(1)).unwrap();
        assert_eq!(fetcher.url(), "http://127.0.0.1:9/fw.zip");
    }

    #[tokio::test]
    async fn test_unreachable_url_is_error() {
        let core = Vivarium::in_memory(CoreOptions::default()).unwrap();
        let state = AppState::with_core(core, Config::default());
        let fetcher =
            FirmwareFetcher::new("http://127.0.0.1:9/fw.zip", Duration::from_secs(2)).unwrap();
        assert!(fetcher.refresh(&state).await.is_err());
        assert!(state.core.firmware().list_names().unwrap().is_empty());
    }
}
