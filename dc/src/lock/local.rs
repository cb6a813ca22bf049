//! In-process lock table

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::{Acquire, LockGuard, NamedLock};
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Named locks shared by every context in one process
#[derive(Clone, Default)]
pub struct LocalLocks {
    held: Arc<Mutex<HashMap<ResourceName, ContextId>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `name`, if any
    pub fn holder(&self, name: &ResourceName) -> Option<ContextId> {
        self.held.lock().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl NamedLock for LocalLocks {
    async fn try_acquire(&self, name: &ResourceName, holder: &ContextId) -> CoordResult<Acquire> {
        debug!(%name, %holder, "LocalLocks::try_acquire: called");
        let mut held = self
            .held
            .lock()
            .map_err(|_| CoordError::Lock("lock table poisoned".to_string()))?;

        if let Some(current) = held.get(name) {
            debug!(%name, %current, "LocalLocks::try_acquire: busy");
            return Ok(Acquire::Busy);
        }
        held.insert(name.clone(), holder.clone());

        let table = Arc::clone(&self.held);
        let release_name = name.clone();
        let release_holder = holder.clone();
        let release = Box::new(move || {
            if let Ok(mut held) = table.lock()
                && held.get(&release_name) == Some(&release_holder)
            {
                held.remove(&release_name);
            }
        });

        Ok(Acquire::Held(LockGuard::new(name.clone(), holder.clone(), release)))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_busy() {
        let locks = LocalLocks::new();
        let name = ResourceName::from("db1");
        let a = ContextId::from("candidate-a");
        let b = ContextId::from("candidate-b");

        let first = locks.try_acquire(&name, &a).await.unwrap();
        assert!(first.is_held());
        let second = locks.try_acquire(&name, &b).await.unwrap();
        assert!(matches!(second, Acquire::Busy));
        assert_eq!(locks.holder(&name), Some(a));
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let locks = LocalLocks::new();
        let name = ResourceName::from("db1");

        let guard = locks.try_acquire(&name, &ContextId::from("candidate-a")).await.unwrap();
        drop(guard);

        assert_eq!(locks.holder(&name), None);
        let again = locks.try_acquire(&name, &ContextId::from("candidate-b")).await.unwrap();
        assert!(again.is_held());
    }

    #[tokio::test]
    async fn test_explicit_release() {
        let locks = LocalLocks::new();
        let name = ResourceName::from("db1");

        match locks.try_acquire(&name, &ContextId::from("candidate-a")).await.unwrap() {
            Acquire::Held(guard) => guard.release(),
            Acquire::Busy => panic!("Expected lock to be free"),
        }
        assert_eq!(locks.holder(&name), None);
    }

    #[tokio::test]
    async fn test_names_are_independent() {
        let locks = LocalLocks::new();
        let a = ContextId::from("candidate-a");

        let g1 = locks.try_acquire(&ResourceName::from("db1"), &a).await.unwrap();
        let g2 = locks.try_acquire(&ResourceName::from("db2"), &a).await.unwrap();
        assert!(g1.is_held());
        assert!(g2.is_held());
    }
}
