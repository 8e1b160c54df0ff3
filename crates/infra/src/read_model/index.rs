use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("key is already taken")]
    Taken,
    #[error("index lock poisoned")]
    Poisoned,
}

/// Key/value lookup kept next to the event store.
///
/// These answer "which stream?" questions the streams themselves cannot
/// (the cart for an owner, the coupon for a code). Unique constraints go
/// through [`LookupIndex::insert_unique`].
pub trait LookupIndex<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    /// Insert only if `key` is free.
    fn insert_unique(&self, key: K, value: V) -> Result<(), IndexError>;
    fn remove(&self, key: &K) -> Option<V>;
    fn values(&self) -> Vec<V>;
}

impl<K, V, S> LookupIndex<K, V> for Arc<S>
where
    S: LookupIndex<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn insert_unique(&self, key: K, value: V) -> Result<(), IndexError> {
        (**self).insert_unique(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn values(&self) -> Vec<V> {
        (**self).values()
    }
}

/// In-memory index for tests/dev.
#[derive(Debug)]
pub struct InMemoryIndex<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryIndex<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LookupIndex<K, V> for InMemoryIndex<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, value);
        }
    }

    fn insert_unique(&self, key: K, value: V) -> Result<(), IndexError> {
        let mut map = self.inner.write().map_err(|_| IndexError::Poisoned)?;
        if map.contains_key(&key) {
            return Err(IndexError::Taken);
        }
        map.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.remove(key)
    }

    fn values(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}
