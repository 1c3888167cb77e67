//! Monitor node records
//!
//! Nodes are identified by the integer id baked into each monitor. A node
//! row appears either when an operator names it or the first time it pushes
//! telemetry, and it is never removed.

use rusqlite::{params, ErrorCode, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::store::Store;

/// Longest accepted node name, in characters
pub const MAX_NODE_NAME_CHARS: usize = 255;

/// Device-supplied node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Name given to a node that has never been renamed
    pub fn default_name(&self) -> String {
        self.0.to_string()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Snapshot of a monitor node as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorNode {
    pub id: NodeId,
    /// Human-readable name (defaults to the id)
    pub name: String,
    /// Address the node last reported from
    pub last_ip: Option<String>,
}

impl MonitorNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: NodeId(row.get(0)?),
            name: row.get(1)?,
            last_ip: row.get(2)?,
        })
    }
}

/// Repository for [`MonitorNode`] records
pub struct NodeRegistry<'a> {
    store: &'a Store,
}

impl<'a> NodeRegistry<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Register a sighting of `id`, creating the node if needed
    pub fn upsert_seen(&self, id: NodeId, ip: Option<&str>) -> CoreResult<MonitorNode> {
        self.store.transaction(|tx| upsert_seen_in(tx, id, ip))
    }

    /// Set the name of a node, creating it if it does not exist yet
    pub fn rename(&self, id: NodeId, name: &str) -> CoreResult<MonitorNode> {
        let len = name.chars().count();
        if len > MAX_NODE_NAME_CHARS {
            return Err(CoreError::validation(format!(
                "node name is {len} characters, limit is {MAX_NODE_NAME_CHARS}"
            )));
        }

        self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO nodes (id, name, last_ip) VALUES (?1, ?2, NULL)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id.0, name],
            )?;
            info!(node = %id, name = %name, "Renamed node");
            fetch_in(tx, id)?.ok_or_else(|| CoreError::NotFound(format!("node {id}")))
        })
    }

    /// All nodes, ordered by id
    pub fn list(&self) -> CoreResult<Vec<MonitorNode>> {
        self.store.transaction(|tx| {
            let mut stmt = tx.prepare("SELECT id, name, last_ip FROM nodes ORDER BY id")?;
            let nodes = stmt
                .query_map([], MonitorNode::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(nodes)
        })
    }

    pub fn get(&self, id: NodeId) -> CoreResult<Option<MonitorNode>> {
        self.store.transaction(|tx| fetch_in(tx, id))
    }
}

fn fetch_in(tx: &Transaction<'_>, id: NodeId) -> CoreResult<Option<MonitorNode>> {
    let node = tx
        .query_row(
            "SELECT id, name, last_ip FROM nodes WHERE id = ?1",
            params![id.0],
            MonitorNode::from_row,
        )
        .optional()?;
    Ok(node)
}

/// Transaction-scoped form of [`NodeRegistry::upsert_seen`].
///
/// The insert is attempted first; a node that already exists shows up as a
/// uniqueness violation and falls through to the address update. An empty
/// `ip` counts as absent.
pub fn upsert_seen_in(
    tx: &Transaction<'_>,
    id: NodeId,
    ip: Option<&str>,
) -> CoreResult<MonitorNode> {
    let ip = ip.filter(|ip| !ip.is_empty());

    let inserted = tx.execute(
        "INSERT INTO nodes (id, name, last_ip) VALUES (?1, ?2, NULL)",
        params![id.0, id.default_name()],
    );
    match inserted {
        Ok(_) => info!(node = %id, "Registered new node"),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            debug!(node = %id, "Node already registered");
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(ip) = ip {
        tx.execute(
            "UPDATE nodes SET last_ip = ?1 WHERE id = ?2",
            params![ip, id.0],
        )?;
    }

    fetch_in(tx, id)?.ok_or_else(|| CoreError::NotFound(format!("node {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaMigrator;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        SchemaMigrator::new(&store).ensure_current_schema().unwrap();
        store
    }

    #[test]
    fn test_upsert_creates_with_default_name() {
        let store = store();
        let node = NodeRegistry::new(&store).upsert_seen(NodeId(12345), None).unwrap();
        assert_eq!(node.name, "12345");
        assert_eq!(node.last_ip, None);
    }

    #[test]
    fn test_upsert_overwrites_ip() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        registry.upsert_seen(NodeId(1), Some("10.0.0.1")).unwrap();
        let node = registry.upsert_seen(NodeId(1), Some("10.0.0.2")).unwrap();
        assert_eq!(node.last_ip.as_deref(), Some("10.0.0.2"));

        // Missing or empty address leaves the last one in place
        let node = registry.upsert_seen(NodeId(1), None).unwrap();
        assert_eq!(node.last_ip.as_deref(), Some("10.0.0.2"));
        let node = registry.upsert_seen(NodeId(1), Some("")).unwrap();
        assert_eq!(node.last_ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_upsert_keeps_custom_name() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        registry.rename(NodeId(7), "Greenhouse").unwrap();
        let node = registry.upsert_seen(NodeId(7), Some("10.3.0.7")).unwrap();
        assert_eq!(node.name, "Greenhouse");
        assert_eq!(node.last_ip.as_deref(), Some("10.3.0.7"));
    }

    #[test]
    fn test_existing_node_insert_conflict_is_not_an_error() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        registry.upsert_seen(NodeId(3), None).unwrap();

        let node = store
            .transaction(|tx| {
                upsert_seen_in(tx, NodeId(3), Some("10.0.0.3"))?;
                upsert_seen_in(tx, NodeId(3), Some("10.0.0.4"))
            })
            .unwrap();
        assert_eq!(node.name, "3");
        assert_eq!(node.last_ip.as_deref(), Some("10.0.0.4"));
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_rename_creates_missing_node() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        let node = registry.rename(NodeId(44444), "Test Node 3").unwrap();
        assert_eq!(node.name, "Test Node 3");
        assert_eq!(node.last_ip, None);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_rename_rejects_long_name() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        registry.upsert_seen(NodeId(5), None).unwrap();

        let err = registry.rename(NodeId(5), &"12ab".repeat(64)).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(registry.get(NodeId(5)).unwrap().unwrap().name, "5");

        let err = registry.rename(NodeId(99999), &"x".repeat(256)).unwrap_err();
        assert!(err.is_validation());
        assert!(registry.get(NodeId(99999)).unwrap().is_none());

        // 255 characters is still allowed, counted as characters not bytes
        let name = "é".repeat(MAX_NODE_NAME_CHARS);
        assert_eq!(registry.rename(NodeId(5), &name).unwrap().name, name);
    }

    #[test]
    fn test_list_ordered_by_id() {
        let store = store();
        let registry = NodeRegistry::new(&store);
        for id in [30, 10, 20] {
            registry.upsert_seen(NodeId(id), None).unwrap();
        }
        let ids: Vec<i64> = registry.list().unwrap().iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let node = MonitorNode {
            id: NodeId(23456),
            name: "23456".to_string(),
            last_ip: Some("10.3.0.1".to_string()),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 23456, "name": "23456", "lastIp": "10.3.0.1"})
        );
    }
}
