//! Per-entity-type advisory locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Named in-process async locks, one per entity type code
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one entity type
    pub async fn acquire(&self, entity_type_code: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(entity_type_code.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_entity_type_is_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.acquire("product").await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.acquire("product")).await;
        assert!(blocked.is_err());

        // other entity types are independent
        let _customer = locks.acquire("customer").await;

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("product")).await;
        assert!(reacquired.is_ok());
    }
}
