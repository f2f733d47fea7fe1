//! Keyed entity map with one async lock per entity.
//!
//! The outer map is only held for lookup and insert. Each value sits behind its
//! own `tokio::sync::Mutex`, so a read-decide-write on one entity serialises
//! against other writers of that entity and nothing else.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::StoreError;

pub struct Keyed<K, V> {
    entries: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Default for Keyed<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Keyed<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under a key that must not exist yet.
    pub fn insert_new(&self, key: K, value: V) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return Err(StoreError::Duplicate(key.to_string()));
        }
        entries.insert(key, Arc::new(Mutex::new(value)));
        Ok(())
    }

    /// Remove an entry. Holders of an outstanding guard keep their copy.
    pub fn remove(&self, key: &K) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn slot(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Acquire the entity's lock. The guard is the unit of
    /// "read current state, decide, write new state".
    pub async fn lock(&self, key: &K) -> Result<OwnedMutexGuard<V>, StoreError> {
        let slot = self
            .slot(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(slot.lock_owned().await)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Keyed<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone,
{
    /// Point-in-time copy of one entity.
    pub async fn get(&self, key: &K) -> Option<V> {
        let slot = self.slot(key)?;
        let value = slot.lock().await;
        Some(value.clone())
    }

    /// Point-in-time copy of every entity. Each entity is consistent on its
    /// own; the set is not a snapshot across entities.
    pub async fn values(&self) -> Vec<V> {
        let slots: Vec<Arc<Mutex<V>>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        out
    }
}
