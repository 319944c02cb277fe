//! Typed state cache adapter
//!
//! Wraps a [`CacheBackend`] with the storage keyspace and the error policy
//! the storage core relies on: read-side failures degrade to cache misses,
//! while `write` and `mark_dirty` surface their errors so the core can fall
//! through to the durable path. The write counter degrades to zero (treated
//! as non-overflow) and the drain lease degrades to not-acquired.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::envelope::CacheEnvelope;
use crate::etag::canonical_json;
use crate::keys::{GrainId, KeySpace};
use crate::types::Result;

/// Writes-per-second window for the surge counter
const WRITE_COUNTER_TTL: Duration = Duration::from_secs(1);
/// Value stored under the drain lease key
const DRAIN_LEASE_VALUE: &str = "locked";

/// A typed cache hit
#[derive(Debug, Clone)]
pub struct CachedState<T> {
    pub data: T,
    pub etag: String,
    pub last_modified: i64,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Typed state cache over a key/value backend
pub struct StateCache {
    backend: Arc<dyn CacheBackend>,
    keys: KeySpace,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StateCache {
    pub fn new(backend: Arc<dyn CacheBackend>, keys: KeySpace) -> Self {
        Self {
            backend,
            keys,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn keyspace(&self) -> &KeySpace {
        &self.keys
    }

    /// Read a grain's cached state as `T`.
    ///
    /// Misses on absent entries, payload type mismatch, and transport
    /// errors (logged).
    pub async fn read<T: DeserializeOwned>(
        &self,
        storage: &str,
        grain: &GrainId,
    ) -> Option<CachedState<T>> {
        let envelope = self.read_envelope(storage, &grain.cache_key()).await?;

        if envelope.type_string != CacheEnvelope::type_token::<T>() {
            debug!(
                storage = storage,
                grain = %grain,
                cached_type = %envelope.type_string,
                "Cached payload type does not match requested type"
            );
            return None;
        }

        match serde_json::from_str(&envelope.serialized_data) {
            Ok(data) => Some(CachedState {
                data,
                etag: envelope.e_tag,
                last_modified: envelope.last_modified,
            }),
            Err(e) => {
                warn!(
                    storage = storage,
                    grain = %grain,
                    error = %e,
                    "Cached payload failed to deserialize"
                );
                None
            }
        }
    }

    /// Read the raw envelope for a grain key. Used by the drainer, which
    /// persists payloads without resolving their type.
    pub async fn read_envelope(&self, storage: &str, grain_key: &str) -> Option<CacheEnvelope> {
        let raw = match self
            .backend
            .hash_get(&self.keys.state_map_key_scoped(storage), grain_key)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(storage = storage, grain = grain_key, error = %e, "Cache read failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match serde_json::from_str::<CacheEnvelope>(&raw) {
            Ok(envelope) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(envelope)
            }
            Err(e) => {
                warn!(storage = storage, grain = grain_key, error = %e, "Cache entry is not a valid envelope");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a typed state revision. Errors surface so the caller can fall
    /// through to the durable path.
    ///
    /// `etag` must have been computed over the canonical JSON of `data`;
    /// when the revision originated as a raw document, cache that
    /// document's own bytes via [`write_envelope`](Self::write_envelope)
    /// instead of re-serializing through a typed value.
    pub async fn write<T: Serialize>(
        &self,
        storage: &str,
        grain: &GrainId,
        data: &T,
        etag: &str,
        last_modified: i64,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let envelope = CacheEnvelope {
            serialized_data: canonical_json(data)?,
            type_string: CacheEnvelope::type_token::<T>().to_string(),
            e_tag: etag.to_string(),
            last_modified,
        };
        self.write_envelope(storage, &grain.cache_key(), &envelope, ttl)
            .await
    }

    /// Cache a raw envelope under a grain key.
    pub async fn write_envelope(
        &self,
        storage: &str,
        grain_key: &str,
        envelope: &CacheEnvelope,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(envelope)?;
        self.backend
            .hash_set(&self.keys.state_map_key_scoped(storage), grain_key, &raw, ttl)
            .await
    }

    /// Drop a grain's cache entry. Errors are logged and swallowed.
    pub async fn remove(&self, storage: &str, grain: &GrainId) {
        if let Err(e) = self
            .backend
            .hash_del(&self.keys.state_map_key_scoped(storage), &grain.cache_key())
            .await
        {
            warn!(storage = storage, grain = %grain, error = %e, "Cache remove failed");
        }
    }

    /// Mark a grain key as pending persistence. Errors surface: an
    /// unacknowledged dirty marker would silently lose the write.
    pub async fn mark_dirty(&self, storage: &str, grain_key: &str) -> Result<()> {
        self.backend
            .set_add(&self.keys.dirty_set_key_scoped(storage), grain_key)
            .await
    }

    /// Clear a grain key's dirty marker. Errors are logged and swallowed;
    /// a stale marker only costs a redundant idempotent drain.
    pub async fn clear_dirty(&self, storage: &str, grain_key: &str) {
        if let Err(e) = self
            .backend
            .set_remove(&self.keys.dirty_set_key_scoped(storage), grain_key)
            .await
        {
            warn!(storage = storage, grain = grain_key, error = %e, "Dirty marker clear failed");
        }
    }

    /// Atomically take up to `count` dirty grain keys.
    pub async fn pop_dirty(&self, storage: &str, count: usize) -> Vec<String> {
        match self
            .backend
            .set_pop(&self.keys.dirty_set_key_scoped(storage), count)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                warn!(storage = storage, error = %e, "Dirty set pop failed");
                Vec::new()
            }
        }
    }

    /// Bump the cluster-wide write counter for a storage and return its
    /// value. Transport errors degrade to zero, which callers treat as
    /// non-overflow.
    pub async fn incr_write_counter(&self, storage: &str) -> i64 {
        match self
            .backend
            .increment(&self.keys.write_counter_key(storage), WRITE_COUNTER_TTL)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(storage = storage, error = %e, "Write counter increment failed");
                0
            }
        }
    }

    /// Try to take the drain lease for a storage. Transport errors degrade
    /// to not-acquired.
    pub async fn try_acquire_drain_lease(&self, storage: &str, ttl: Duration) -> bool {
        match self
            .backend
            .set_if_absent(&self.keys.drain_lease_key(storage), DRAIN_LEASE_VALUE, ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(storage = storage, error = %e, "Drain lease acquisition failed");
                false
            }
        }
    }

    /// Release the drain lease. Errors are logged and swallowed; the lease
    /// TTL bounds a stuck lease.
    pub async fn release_drain_lease(&self, storage: &str) {
        if let Err(e) = self
            .backend
            .delete(&self.keys.drain_lease_key(storage))
            .await
        {
            warn!(storage = storage, error = %e, "Drain lease release failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
