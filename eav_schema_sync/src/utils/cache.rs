//! Small TTL cache used for introspected schemas

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Key/value cache capability. Implementations must be safe to share
/// between concurrent analyses.
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn set(&self, key: K, value: V);

    fn invalidate(&self, key: &K);

    fn clear(&self);
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory cache whose entries expire a fixed time after insertion
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert with an entry-specific lifetime
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock().insert(key, CacheEntry { value, expires_at });
    }

    /// Number of stored entries, expired ones included until touched
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // entries are replaced whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K, V> Cache<K, V> for TtlCache<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
