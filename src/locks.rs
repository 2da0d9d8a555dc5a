//! Key-scoped mutual exclusion for reconciliations.
//!
//! Reconciliations touching the same route name, upstream host or collection
//! run one at a time inside the process. Keys are always acquired in sorted
//! order, so two holders of overlapping key sets cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::types::Environment;

/// Key for a route name within an environment
pub fn route_key(environment: &Environment, slug: &str) -> String {
    format!("route:{environment}:{slug}")
}

/// Key for an upstream host within an environment
pub fn host_key(environment: &Environment, host: &str) -> String {
    format!("host:{environment}:{host}")
}

/// Key for a collection
pub fn collection_key(collection_id: Uuid) -> String {
    format!("collection:{collection_id}")
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Registry of per-key async mutexes
///
/// Entries are created on demand and pruned once no guard refers to them.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Holds a set of keys until dropped
pub struct KeyedGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
    locks: KeyedLocks,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every key is held by the returned guard
    pub async fn acquire<I>(&self, keys: I) -> KeyedGuard
    where
        I: IntoIterator<Item = String>,
    {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<_> = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            keys.iter()
                .map(|k| map.entry(k.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        tracing::trace!(keys = ?keys, "acquired reconciliation locks");
        KeyedGuard {
            guards,
            keys,
            locks: self.clone(),
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Checks whether no key is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyedGuard {
    /// Keys held, in acquisition order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guards.clear();

        let mut map = self
            .locks
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            // Only the map itself still refers to an idle entry.
            if map.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                map.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("keys", &self.keys).finish()
    }
}
