//! Background reconciliation of dirty cache entries
//!
//! Every process runs the drain task, but for a given storage only the
//! holder of the cluster-wide drain lease acts in a cycle. The lease holder
//! pops a batch from the dirty set, persists each entry's latest cached
//! value to the durable store, refreshes the cache with the new version
//! token, and clears the dirty marker. A failing entry is re-marked dirty
//! and retried in a later cycle, so every dirty key is eventually persisted
//! at least once; intervening writes coalesce in the cache entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEnvelope, StateCache};
use crate::config::StorageOptions;
use crate::db::{DocumentStore, GrainStateDoc};
use crate::keys::GrainId;
use crate::storage::GrainStorage;
use crate::types::Result;

/// Scheduling granularity of the drain loop
const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct DrainTarget {
    storage: String,
    options: StorageOptions,
    store: Arc<dyn DocumentStore>,
    cache: Arc<StateCache>,
    last_run: Mutex<Option<Instant>>,
}

impl DrainTarget {
    /// Whether this storage's drain interval has elapsed. Marks the run.
    fn due(&self, now: Instant) -> bool {
        let Ok(mut last_run) = self.last_run.lock() else {
            return false;
        };
        match *last_run {
            Some(last) if now.duration_since(last) < self.options.write_behind.drain_interval() => {
                false
            }
            _ => {
                *last_run = Some(now);
                true
            }
        }
    }

    fn db_tenant(&self) -> Option<&str> {
        self.options
            .use_tenant_per_storage
            .then_some(self.storage.as_str())
    }
}

/// Registry of storages eligible for drainage.
///
/// Populated at startup, one entry per storage instantiation; append-only
/// and safe for concurrent readers.
#[derive(Default)]
pub struct StorageRegistry {
    targets: DashMap<String, Arc<DrainTarget>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a storage for background drainage. Storages without a cache
    /// tier have nothing to drain and are skipped.
    pub fn register(&self, storage: &GrainStorage) {
        let Some(cache) = storage.cache() else {
            warn!(
                storage = %storage.name(),
                "Storage has no cache tier; skipping drain registration"
            );
            return;
        };

        info!(storage = %storage.name(), "Registered storage for drainage");
        self.targets.insert(
            storage.name().to_string(),
            Arc::new(DrainTarget {
                storage: storage.name().to_string(),
                options: storage.options().clone(),
                store: storage.store(),
                cache,
                last_run: Mutex::new(None),
            }),
        );
    }

    pub fn storage_names(&self) -> Vec<String> {
        self.targets.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn target(&self, storage: &str) -> Option<Arc<DrainTarget>> {
        self.targets.get(storage).map(|e| Arc::clone(e.value()))
    }
}

/// Snapshot of drain counters
#[derive(Debug, Clone, Default)]
pub struct DrainStats {
    /// Cycles in which this process held the lease
    pub cycles: u64,
    /// Entries persisted to the durable store
    pub drained: u64,
    /// Entries that failed and were re-marked dirty
    pub failures: u64,
}

/// Per-process drain task over a storage registry
pub struct Drainer {
    registry: Arc<StorageRegistry>,
    cycles: AtomicU64,
    drained: AtomicU64,
    failures: AtomicU64,
}

impl Drainer {
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self {
            registry,
            cycles: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Spawn the background loop. Each registered storage drains when its
    /// own interval has elapsed.
    pub fn spawn(self: &Arc<Self>) {
        let drainer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                drainer.tick().await;
            }
        });

        info!("Drain task started");
    }

    /// Run one scheduling tick: drain every storage whose interval elapsed.
    pub async fn tick(&self) {
        let now = Instant::now();
        let due: Vec<Arc<DrainTarget>> = self
            .registry
            .targets
            .iter()
            .filter(|entry| entry.value().due(now))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for target in due {
            self.drain_target(&target).await;
        }
    }

    /// Drain one storage for one cycle, regardless of its schedule.
    pub async fn drain_storage(&self, storage: &str) {
        if let Some(target) = self.registry.target(storage) {
            self.drain_target(&target).await;
        }
    }

    async fn drain_target(&self, target: &DrainTarget) {
        let write_behind = &target.options.write_behind;
        if !target
            .cache
            .try_acquire_drain_lease(&target.storage, write_behind.drain_lock_ttl())
            .await
        {
            debug!(storage = %target.storage, "Drain lease held elsewhere; skipping cycle");
            return;
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.run_cycle(target).await;
        // The lease releases on every exit path; its TTL covers a crashed
        // holder.
        target.cache.release_drain_lease(&target.storage).await;
    }

    async fn run_cycle(&self, target: &DrainTarget) {
        let keys = target
            .cache
            .pop_dirty(&target.storage, target.options.write_behind.batch_size)
            .await;
        if keys.is_empty() {
            return;
        }

        debug!(storage = %target.storage, count = keys.len(), "Draining dirty entries");

        for grain_key in keys {
            match self.persist_entry(target, &grain_key).await {
                Ok(persisted) => {
                    if persisted {
                        self.drained.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    warn!(
                        storage = %target.storage,
                        grain = %grain_key,
                        error = %e,
                        "Drain failed; re-marking dirty for retry"
                    );
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = target.cache.mark_dirty(&target.storage, &grain_key).await {
                        error!(
                            storage = %target.storage,
                            grain = %grain_key,
                            error = %e,
                            "Failed to re-mark dirty entry"
                        );
                    }
                }
            }
        }
    }

    /// Persist one dirty entry. Returns false when the cache no longer
    /// holds it (nothing to persist).
    async fn persist_entry(&self, target: &DrainTarget, grain_key: &str) -> Result<bool> {
        let Some(envelope) = target.cache.read_envelope(&target.storage, grain_key).await else {
            target.cache.clear_dirty(&target.storage, grain_key).await;
            return Ok(false);
        };

        // The payload stays opaque: parse to a JSON value, never to a
        // concrete type. The type token travels with it.
        let data: serde_json::Value = serde_json::from_str(&envelope.serialized_data)?;
        let grain = GrainId::from_cache_key(grain_key);
        let now = Utc::now().timestamp_millis();

        let doc = GrainStateDoc::new(
            target.cache.keyspace().document_id(&grain),
            data,
            now,
            envelope.type_string.clone(),
        );
        target.store.upsert(&doc, target.db_tenant()).await?;

        let refreshed = CacheEnvelope {
            serialized_data: doc.data.to_string(),
            type_string: envelope.type_string,
            e_tag: doc.etag()?,
            last_modified: now,
        };
        target
            .cache
            .write_envelope(
                &target.storage,
                grain_key,
                &refreshed,
                target.options.write_behind.state_ttl(),
            )
            .await?;

        target.cache.clear_dirty(&target.storage, grain_key).await;
        Ok(true)
    }

    pub fn stats(&self) -> DrainStats {
        DrainStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
