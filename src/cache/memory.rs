//! In-memory cache backend
//!
//! DashMap-backed implementation of the key/value contract. Expiry is
//! checked lazily on access; a background sweep task can reclaim cold
//! expired keys. Suitable for tests and single-process deployments; a
//! shared engine serves the same contract across a cluster.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::backend::CacheBackend;
use crate::types::Result;

struct HashEntry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct CounterEntry {
    value: i64,
    expires_at: Instant,
}

struct LockEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory key/value cache
#[derive(Default)]
pub struct MemoryCacheBackend {
    hashes: DashMap<String, HashEntry>,
    sets: DashMap<String, HashSet<String>>,
    counters: DashMap<String, CounterEntry>,
    locks: DashMap<String, LockEntry>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a set's members. Inspection helper; does not mutate.
    pub fn set_members(&self, key: &str) -> Vec<String> {
        self.sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current value of a lock key, if present and unexpired.
    pub fn lock_value(&self, key: &str) -> Option<String> {
        self.locks
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Remove expired hashes, counters, and locks. Returns removed key count.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        let expired_hashes: Vec<String> = self
            .hashes
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| e.key().clone())
            .collect();
        for key in expired_hashes {
            if self.hashes.remove(&key).is_some() {
                removed += 1;
            }
        }

        let expired_counters: Vec<String> = self
            .counters
            .iter()
            .filter(|e| now >= e.expires_at)
            .map(|e| e.key().clone())
            .collect();
        for key in expired_counters {
            if self.counters.remove(&key).is_some() {
                removed += 1;
            }
        }

        let expired_locks: Vec<String> = self
            .locks
            .iter()
            .filter(|e| now >= e.expires_at)
            .map(|e| e.key().clone())
            .collect();
        for key in expired_locks {
            if self.locks.remove(&key).is_some() {
                removed += 1;
            }
        }

        removed
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        if let Some(entry) = self.hashes.get(key) {
            if !entry.is_expired() {
                return Ok(entry.fields.get(field).cloned());
            }
            drop(entry);
            self.hashes.remove(key);
        }
        Ok(None)
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut entry = self.hashes.entry(key.to_string()).or_insert_with(|| HashEntry {
            fields: HashMap::new(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.fields.clear();
        }
        entry.fields.insert(field.to_string(), value.to_string());
        // TTL re-arms on every write, so a hot hash never expires.
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<()> {
        if let Some(mut entry) = self.hashes.get_mut(key) {
            entry.fields.remove(field);
            let empty = entry.fields.is_empty();
            drop(entry);
            if empty {
                self.hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut members) = self.sets.get_mut(key) {
            members.remove(member);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let Some(mut members) = self.sets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let popped: Vec<String> = members.iter().take(count).cloned().collect();
        for member in &popped {
            members.remove(member);
        }
        let empty = members.is_empty();
        drop(members);
        if empty {
            self.sets.remove(key);
        }
        Ok(popped)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: 0,
                expires_at: Instant::now() + ttl,
            });
        if Instant::now() >= entry.expires_at {
            // Expired counter restarts the window.
            entry.value = 0;
            entry.expires_at = Instant::now() + ttl;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut acquired = false;
        let mut entry = self.locks.entry(key.to_string()).or_insert_with(|| {
            acquired = true;
            LockEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            }
        });
        if !acquired && Instant::now() >= entry.expires_at {
            entry.value = value.to_string();
            entry.expires_at = Instant::now() + ttl;
            acquired = true;
        }
        if acquired {
            debug!(key = key, "Lock acquired");
        }
        Ok(acquired)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.hashes.remove(key);
        self.sets.remove(key);
        self.counters.remove(key);
        self.locks.remove(key);
        Ok(())
    }
}

/// Spawn a background task to periodically sweep expired entries
pub fn spawn_cache_cleanup_task(backend: Arc<MemoryCacheBackend>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = backend.cleanup();
            if removed > 0 {
                debug!(removed = removed, "Cache cleanup completed");
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        "Cache cleanup task started"
    );
}
