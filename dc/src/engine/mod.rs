//! Database engine collaborator
//!
//! The coordinator never interprets payloads. An owner opens the engine for
//! each resource it wins and hands every request payload to `execute`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::{EngineBackend, EngineConfig};
use crate::domain::ResourceName;
use crate::error::CoordResult;

mod echo;
mod sqlite;

pub use echo::EchoEngine;
pub use sqlite::SqliteEngine;

/// Build the engine selected in the config
pub fn from_config(config: &EngineConfig) -> Arc<dyn Engine> {
    debug!(backend = ?config.backend, dir = ?config.dir, "engine::from_config: called");
    match (config.backend, &config.dir) {
        (EngineBackend::Echo, _) => Arc::new(EchoEngine::new()),
        (EngineBackend::Sqlite, Some(dir)) => Arc::new(SqliteEngine::on_disk(dir.clone())),
        (EngineBackend::Sqlite, None) => Arc::new(SqliteEngine::in_memory()),
    }
}

/// Handle to an opened resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineHandle {
    id: Uuid,
    name: ResourceName,
}

impl EngineHandle {
    pub(crate) fn new(name: ResourceName) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }
}

/// Engine interface consumed by owners
#[async_trait]
pub trait Engine: Send + Sync {
    /// Open the resource identified by `name`
    async fn open(&self, name: &ResourceName) -> CoordResult<EngineHandle>;

    /// Close a handle returned by `open`
    async fn close(&self, handle: EngineHandle) -> CoordResult<()>;

    /// Run one opaque request against an open handle
    async fn execute(&self, handle: &EngineHandle, payload: Vec<u8>) -> CoordResult<Vec<u8>>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}
