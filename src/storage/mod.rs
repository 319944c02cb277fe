//! Grain storage core
//!
//! The public READ/WRITE/CLEAR operations over one named storage. Reads are
//! cache-first when read-through is enabled and fall back to the durable
//! store, migrating legacy document ids on the way. Writes consult the
//! cluster-wide write counter: below the surge threshold they go through to
//! the durable store (with optional ETag enforcement); above it they land
//! in the cache and are marked dirty for the drainer. Absorption applies
//! only outside a request tenant scope: the drainer pops the tenantless
//! dirty set, so tenant-scoped writes always go through.
//!
//! ## Error posture
//!
//! READ never fails: failures are logged and the slot keeps whatever was
//! populated before the failure, so the host's next activation retries
//! naturally. WRITE and CLEAR surface durable-store errors unchanged; cache
//! failures on the overflow path fall through to the durable path instead
//! of failing the operation.

mod slot;

pub use slot::StateSlot;

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEnvelope, StateCache};
use crate::config::StorageOptions;
use crate::db::{DocumentStore, GrainStateDoc};
use crate::etag::version_etag;
use crate::keys::{GrainId, KeySpace};
use crate::tenant::current_tenant;
use crate::types::{GranaryError, Result};

/// One named grain storage
pub struct GrainStorage {
    name: String,
    options: StorageOptions,
    keys: KeySpace,
    store: Arc<dyn DocumentStore>,
    cache: Option<Arc<StateCache>>,
}

impl GrainStorage {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        options: StorageOptions,
        store: Arc<dyn DocumentStore>,
        cache: Option<Arc<StateCache>>,
    ) -> Self {
        let name = name.into();
        let keys = KeySpace::new(cluster);

        info!(
            storage = %name,
            cluster = %keys.cluster(),
            write_behind = options.write_behind.enable_write_behind && cache.is_some(),
            read_through = options.write_behind.enable_read_through && cache.is_some(),
            "Grain storage initialized"
        );

        Self {
            name,
            options,
            keys,
            store,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn keyspace(&self) -> &KeySpace {
        &self.keys
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> Option<Arc<StateCache>> {
        self.cache.clone()
    }

    /// Database tenant for durable sessions of this storage.
    fn db_tenant(&self) -> Option<&str> {
        self.options
            .use_tenant_per_storage
            .then_some(self.name.as_str())
    }

    fn read_through_cache(&self) -> Option<&Arc<StateCache>> {
        self.cache
            .as_ref()
            .filter(|_| self.options.write_behind.enable_read_through)
    }

    /// READ: populate `slot` from the cache or the durable store.
    ///
    /// Never fails; on error the slot keeps whatever was populated before
    /// the failure and the host retries on its next activation.
    pub async fn read<T>(&self, grain: &GrainId, slot: &mut StateSlot<T>)
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        if let Some(cache) = self.read_through_cache() {
            if let Some(hit) = cache.read::<T>(&self.name, grain).await {
                debug!(storage = %self.name, grain = %grain, "State served from cache");
                slot.data = Some(hit.data);
                slot.etag = Some(hit.etag);
                slot.record_exists = true;
                return;
            }
        }

        let doc_id = self.keys.document_id(grain);
        match self.store.load(&doc_id, self.db_tenant()).await {
            Ok(Some(doc)) => {
                self.populate_slot(grain, doc, true, slot).await;
            }
            Ok(None) => self.read_legacy(grain, slot).await,
            Err(e) => {
                error!(storage = %self.name, grain = %grain, error = %e, "State read failed");
            }
        }
    }

    /// Fall back to the legacy document id and migrate on hit.
    async fn read_legacy<T>(&self, grain: &GrainId, slot: &mut StateSlot<T>)
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let legacy = match self
            .store
            .load(grain.legacy_document_id(), self.db_tenant())
            .await
        {
            Ok(Some(legacy)) => legacy,
            Ok(None) => {
                slot.reset();
                return;
            }
            Err(e) => {
                error!(storage = %self.name, grain = %grain, error = %e, "Legacy state read failed");
                return;
            }
        };

        // Migrate: store canonical, then delete legacy. A failed second
        // phase leaves both ids; the next read re-runs this path.
        let doc = GrainStateDoc::new(
            self.keys.document_id(grain),
            legacy.data,
            Utc::now().timestamp_millis(),
            legacy.type_string,
        );
        match self.store.upsert(&doc, self.db_tenant()).await {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .delete(grain.legacy_document_id(), self.db_tenant())
                    .await
                {
                    warn!(
                        storage = %self.name,
                        grain = %grain,
                        error = %e,
                        "Legacy document delete failed; duplicate remains until the next read"
                    );
                }
                info!(storage = %self.name, grain = %grain, "Migrated legacy state document");
                self.populate_slot(grain, doc, false, slot).await;
            }
            Err(e) => {
                error!(storage = %self.name, grain = %grain, error = %e, "Legacy state migration failed");
            }
        }
    }

    /// Populate the slot from a durable document, optionally warming the
    /// cache.
    async fn populate_slot<T>(
        &self,
        grain: &GrainId,
        doc: GrainStateDoc,
        warm: bool,
        slot: &mut StateSlot<T>,
    ) where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let etag = match doc.etag() {
            Ok(etag) => etag,
            Err(e) => {
                error!(storage = %self.name, grain = %grain, error = %e, "ETag computation failed");
                return;
            }
        };

        // The token is bound to the stored canonical bytes; a typed round
        // trip may not reproduce them, so the warmed envelope carries the
        // document's own rendering.
        let canonical = doc.data.to_string();

        let data: T = match serde_json::from_value(doc.data) {
            Ok(data) => data,
            Err(e) => {
                error!(storage = %self.name, grain = %grain, error = %e, "Stored payload failed to deserialize");
                return;
            }
        };

        if warm {
            if let Some(cache) = self.read_through_cache() {
                let envelope = CacheEnvelope {
                    serialized_data: canonical,
                    type_string: doc.type_string,
                    e_tag: etag.clone(),
                    last_modified: doc.last_modified,
                };
                if let Err(e) = cache
                    .write_envelope(
                        &self.name,
                        &grain.cache_key(),
                        &envelope,
                        self.options.write_behind.state_ttl(),
                    )
                    .await
                {
                    warn!(storage = %self.name, grain = %grain, error = %e, "Cache warm failed");
                }
            }
        }

        slot.data = Some(data);
        slot.etag = Some(etag);
        slot.record_exists = true;
    }

    /// WRITE: persist the slot's payload as a fresh revision.
    ///
    /// Under surge the revision lands in the cache and is marked dirty;
    /// otherwise (or when the cache misbehaves) it goes through to the
    /// durable store with optional ETag enforcement.
    pub async fn write<T>(&self, grain: &GrainId, slot: &mut StateSlot<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let doc_id = self.keys.document_id(grain);
        let now = Utc::now().timestamp_millis();
        let value = match &slot.data {
            Some(data) => serde_json::to_value(data)?,
            None => serde_json::Value::Null,
        };
        let canonical = value.to_string();
        let new_etag = version_etag(now, &canonical);

        let envelope = CacheEnvelope {
            serialized_data: canonical,
            type_string: CacheEnvelope::type_token::<T>().to_string(),
            e_tag: new_etag.clone(),
            last_modified: now,
        };

        if let Some(cache) = &self.cache {
            // The drainer pops the tenantless dirty set, so a revision
            // absorbed under a request tenant would never be persisted.
            // Tenant-scoped writes always go through.
            if self.options.write_behind.enable_write_behind && current_tenant().is_none() {
                let count = cache.incr_write_counter(&self.name).await;
                if count > self.options.write_behind.threshold {
                    match self.write_behind(cache, grain, &envelope).await {
                        Ok(()) => {
                            debug!(
                                storage = %self.name,
                                grain = %grain,
                                writes_per_sec = count,
                                "Write absorbed by cache"
                            );
                            slot.etag = Some(new_etag);
                            slot.record_exists = true;
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(
                                storage = %self.name,
                                grain = %grain,
                                error = %e,
                                "Write-behind cache write failed; falling through to durable store"
                            );
                        }
                    }
                }
            }
        }

        if self.options.check_concurrency && slot.record_exists && slot.etag.is_some() {
            self.enforce_etag(grain, &doc_id, slot.etag.as_deref()).await?;
        }

        let doc = GrainStateDoc::new(doc_id, value, now, envelope.type_string.clone());
        self.store.upsert(&doc, self.db_tenant()).await?;
        slot.etag = Some(new_etag);
        slot.record_exists = true;

        if let Some(cache) = &self.cache {
            let write_behind = &self.options.write_behind;
            if write_behind.enable_read_through || write_behind.enable_write_behind {
                if let Err(e) = cache
                    .write_envelope(
                        &self.name,
                        &grain.cache_key(),
                        &envelope,
                        write_behind.state_ttl(),
                    )
                    .await
                {
                    warn!(storage = %self.name, grain = %grain, error = %e, "Cache refresh failed");
                }
                cache.clear_dirty(&self.name, &grain.cache_key()).await;
            }
        }

        Ok(())
    }

    /// Overflow path: cache the revision and mark it dirty. Either step
    /// failing surfaces so the caller falls through to the durable path.
    async fn write_behind(
        &self,
        cache: &StateCache,
        grain: &GrainId,
        envelope: &CacheEnvelope,
    ) -> Result<()> {
        let grain_key = grain.cache_key();
        cache
            .write_envelope(
                &self.name,
                &grain_key,
                envelope,
                self.options.write_behind.state_ttl(),
            )
            .await?;
        cache.mark_dirty(&self.name, &grain_key).await?;
        Ok(())
    }

    /// Fail when the caller's token no longer matches the stored revision.
    async fn enforce_etag(
        &self,
        grain: &GrainId,
        doc_id: &str,
        provided: Option<&str>,
    ) -> Result<()> {
        let Some(current) = self.store.load(doc_id, self.db_tenant()).await? else {
            // Record gone between reads; the upsert recreates it.
            return Ok(());
        };
        let current_etag = current.etag()?;
        if provided != Some(current_etag.as_str()) {
            return Err(GranaryError::ConcurrencyConflict {
                grain: grain.to_string(),
                provided: provided.unwrap_or_default().to_string(),
                current: current_etag,
            });
        }
        Ok(())
    }

    /// CLEAR: delete the grain's durable document and drop its cache entry.
    pub async fn clear<T>(&self, grain: &GrainId, slot: &mut StateSlot<T>) -> Result<()> {
        let doc_id = self.keys.document_id(grain);
        self.store.delete(&doc_id, self.db_tenant()).await?;

        if let Some(cache) = &self.cache {
            cache.remove(&self.name, grain).await;
            cache.clear_dirty(&self.name, &grain.cache_key()).await;
        }

        debug!(storage = %self.name, grain = %grain, "State cleared");
        slot.reset();
        Ok(())
    }
}
