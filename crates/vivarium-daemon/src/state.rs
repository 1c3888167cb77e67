//! Application state management

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use vivarium_core::{CoreError, SchemaStatus, Store, Vivarium};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Malformed request: {0}")]
    BadRequest(String),
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Shared application state
pub struct AppState {
    /// Core components over the opened store
    pub core: Vivarium,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Open the database, migrate it, and build application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store = Store::open_location(&config.database.path)?;
        let (core, status) = Vivarium::open(store, config.core_options())?;
        match status {
            SchemaStatus::Current => info!(path = %config.database.path, "Database schema is current"),
            SchemaStatus::Migrated { rows } => {
                info!(path = %config.database.path, rows, "Database schema migrated")
            }
        }
        Ok(Self::with_core(core, config))
    }

    pub fn with_core(core: Vivarium, config: Config) -> Arc<Self> {
        Arc::new(Self { core, config })
    }

    /// Run a blocking core operation off the async executor
    pub async fn run<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&Vivarium) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let core = self.core.clone();
        let result = tokio::task::spawn_blocking(move || f(&core)).await?;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vivarium_core::{CoreOptions, NodeId};

    #[tokio::test]
    async fn test_run_propagates_core_errors() {
        let core = Vivarium::in_memory(CoreOptions::default()).unwrap();
        let state = AppState::with_core(core, Config::default());

        let err = state
            .run(|core| core.nodes().rename(NodeId(1), &"n".repeat(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::Validation(_))));

        let node = state
            .run(|core| core.nodes().rename(NodeId(1), "Terrarium"))
            .await
            .unwrap();
        assert_eq!(node.name, "Terrarium");
    }

    #[test]
    fn test_new_opens_in_memory_database() {
        let mut config = Config::default();
        config.database.path = ":memory:".to_string();
        let state = AppState::new(config).unwrap();
        assert!(state.core.nodes().list().unwrap().is_empty());
    }
}
