//! Echo engine - answers every request with its own payload
//!
//! Records what it executed per resource, which makes it the engine of
//! choice for checking ordering and at-most-once delivery.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{Engine, EngineHandle};
use crate::domain::ResourceName;
use crate::error::{CoordError, CoordResult};

#[derive(Default)]
struct EchoState {
    open: HashSet<Uuid>,
    executed: HashMap<ResourceName, Vec<Vec<u8>>>,
}

/// Engine that returns each payload unchanged
///
/// Clones share state, so a test can keep one clone and inspect what the
/// owners ran.
#[derive(Clone, Default)]
pub struct EchoEngine {
    state: Arc<Mutex<EchoState>>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads executed against `name`, in execution order
    pub fn executed(&self, name: &ResourceName) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|s| s.executed.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.state.lock().map(|s| s.open.len()).unwrap_or(0)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EchoState) -> CoordResult<T>) -> CoordResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoordError::Engine("echo state poisoned".to_string()))?;
        f(&mut state)
    }
}

#[async_trait]
impl Engine for EchoEngine {
    async fn open(&self, name: &ResourceName) -> CoordResult<EngineHandle> {
        debug!(%name, "EchoEngine::open: called");
        let handle = EngineHandle::new(name.clone());
        self.with_state(|s| {
            s.open.insert(handle.id());
            Ok(())
        })?;
        Ok(handle)
    }

    async fn close(&self, handle: EngineHandle) -> CoordResult<()> {
        debug!(name = %handle.name(), "EchoEngine::close: called");
        self.with_state(|s| {
            s.open.remove(&handle.id());
            Ok(())
        })
    }

    async fn execute(&self, handle: &EngineHandle, payload: Vec<u8>) -> CoordResult<Vec<u8>> {
        self.with_state(|s| {
            if !s.open.contains(&handle.id()) {
                return Err(CoordError::Engine(format!("{} is not open", handle.name())));
            }
            s.executed.entry(handle.name().clone()).or_default().push(payload.clone());
            Ok(payload)
        })
    }

    fn backend(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_records_in_order() {
        let engine = EchoEngine::new();
        let name = ResourceName::from("db1");
        let handle = engine.open(&name).await.unwrap();

        assert_eq!(engine.execute(&handle, b"a".to_vec()).await.unwrap(), b"a");
        assert_eq!(engine.execute(&handle, b"b".to_vec()).await.unwrap(), b"b");

        assert_eq!(engine.executed(&name), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(engine.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_execute_on_closed_handle_fails() {
        let engine = EchoEngine::new();
        let handle = engine.open(&ResourceName::from("db1")).await.unwrap();
        engine.close(handle.clone()).await.unwrap();

        let err = engine.execute(&handle, b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, CoordError::Engine(_)));
        assert_eq!(engine.open_handles(), 0);
    }
}
