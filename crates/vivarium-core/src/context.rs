//! Startup context tying the store to the components

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::firmware::{FirmwareRepository, HashPolicy};
use crate::node::NodeRegistry;
use crate::schema::{SchemaMigrator, SchemaStatus};
use crate::stats::IngestionEngine;
use crate::store::Store;

/// Options that change core behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreOptions {
    #[serde(default)]
    pub hash_policy: HashPolicy,
}

/// Store handle plus options, built once at startup and shared by reference
#[derive(Debug, Clone)]
pub struct Vivarium {
    store: Store,
    options: CoreOptions,
}

impl Vivarium {
    /// Wrap a store and bring its schema up to date
    pub fn open(store: Store, options: CoreOptions) -> CoreResult<(Self, SchemaStatus)> {
        let status = SchemaMigrator::new(&store).ensure_current_schema()?;
        Ok((Self { store, options }, status))
    }

    /// Fresh in-memory instance
    pub fn in_memory(options: CoreOptions) -> CoreResult<Self> {
        let (vivarium, _) = Self::open(Store::open_in_memory()?, options)?;
        Ok(vivarium)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn options(&self) -> CoreOptions {
        self.options
    }

    pub fn nodes(&self) -> NodeRegistry<'_> {
        NodeRegistry::new(&self.store)
    }

    pub fn ingestion(&self) -> IngestionEngine<'_> {
        IngestionEngine::new(&self.store)
    }

    pub fn firmware(&self) -> FirmwareRepository<'_> {
        FirmwareRepository::new(&self.store, self.options.hash_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{ArchiveEntry, FirmwareOffer};
    use crate::node::NodeId;
    use serde_json::json;

    #[test]
    fn test_components_share_store() {
        let vivarium = Vivarium::in_memory(CoreOptions::default()).unwrap();
        let payload = json!({
            "id": 12345,
            "timestamp": "2020-03-20T14:30:43",
            "highTemp": 24.5,
            "lowTemp": 20.0,
            "airTemp": 22.24,
            "humidity": 72,
            "digital1": 0,
            "digital2": 1,
            "analog": 135,
        });
        vivarium
            .ingestion()
            .ingest(payload.as_object().unwrap(), Some("10.3.0.1"))
            .unwrap();

        let node = vivarium.nodes().get(NodeId(12345)).unwrap().unwrap();
        assert_eq!(node.last_ip.as_deref(), Some("10.3.0.1"));
        assert_eq!(vivarium.ingestion().count().unwrap(), 1);
    }

    #[test]
    fn test_hash_policy_applies_to_firmware() {
        let options = CoreOptions {
            hash_policy: HashPolicy::TrustFilename,
        };
        let vivarium = Vivarium::in_memory(options).unwrap();
        vivarium
            .firmware()
            .add_firmware_archive(&[ArchiveEntry::new(
                "fw1-1.2.3-8ddd8be4b179a529afa5f2ffae4b9858.bin",
                b"111".to_vec(),
            )])
            .unwrap();
        assert_eq!(
            vivarium
                .firmware()
                .negotiate("fw1", "fw1-1.2.3-8ddd8be4b179a529afa5f2ffae4b9858")
                .unwrap(),
            FirmwareOffer::NotModified
        );
    }

    #[test]
    fn test_reopen_reports_current() {
        let (vivarium, status) =
            Vivarium::open(Store::open_in_memory().unwrap(), CoreOptions::default()).unwrap();
        assert_eq!(status, SchemaStatus::Current);
        let (_, status) = Vivarium::open(vivarium.store().clone(), vivarium.options()).unwrap();
        assert_eq!(status, SchemaStatus::Current);
    }
}
