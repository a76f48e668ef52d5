use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Per-entity-type mutual exclusion for session operations.
///
/// Each entity type gets its own async mutex, created on first use and
/// kept for the lifetime of the table; entity types are a bounded, known
/// set, so entries are never removed.
pub struct SessionLockTable {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLockTable {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, entity_type: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.locks.lock().expect("session lock table poisoned");
        Arc::clone(
            table
                .entry(entity_type.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Runs `op` while holding the lock for `entity_type`.
    ///
    /// Calls for the same entity type are strictly queued; distinct entity
    /// types never contend. The guard drops on every exit path, so a
    /// failing `op` still releases the lock while its error reaches the
    /// caller.
    pub async fn with_lock<T, F, Fut>(&self, entity_type: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.handle(entity_type);
        let _guard = handle.lock().await;
        op().await
    }
}

impl Default for SessionLockTable {
    fn default() -> Self {
        Self::new()
    }
}
