//! Vivarium Core - Persistence and domain logic for the Vivarium stats server
//!
//! This crate provides the storage-backed components of the system:
//! - Node registry for monitor identity, names and last-seen addresses
//! - Telemetry ingestion with automatic node registration
//! - Firmware archive ingestion and update negotiation
//! - Schema migration for stores created by older releases

pub mod context;
pub mod error;
pub mod firmware;
pub mod node;
pub mod schema;
pub mod stats;
pub mod store;

pub use context::{CoreOptions, Vivarium};
pub use error::{CoreError, CoreResult};
pub use firmware::{
    parse_firmware_filename, ArchiveEntry, ArchiveReport, FirmwareFile, FirmwareMetadata,
    FirmwareOffer, FirmwareRepository, HashPolicy, ParseError, ParsedFirmwareName,
};
pub use node::{MonitorNode, NodeId, NodeRegistry};
pub use schema::{SchemaMigrator, SchemaStatus};
pub use stats::{IngestionEngine, StatsInstance, StatsSample};
pub use store::Store;
