//! Grain storage integration tests
//!
//! Exercises READ/WRITE/CLEAR over the in-memory store and cache backends:
//! write-through round trips, ETag enforcement, legacy-id migration,
//! write-behind overflow, and cache-failure fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use granary::{
    CacheBackend, CacheEnvelope, DocumentStore, GrainId, GrainStateDoc, GrainStorage,
    GranaryError, KeySpace, MemoryCacheBackend, MemoryStateStore, Result, StateCache, StateSlot,
    StorageOptions, WriteBehindOptions,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct TestState {
    n: String,
    v: i32,
}

fn state(n: &str, v: i32) -> TestState {
    TestState { n: n.into(), v }
}

fn overflow_options() -> StorageOptions {
    StorageOptions {
        write_behind: WriteBehindOptions {
            threshold: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn durable_only(options: StorageOptions) -> (GrainStorage, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let storage = GrainStorage::new("s1", "c1", options, store.clone(), None);
    (storage, store)
}

fn with_cache(
    options: StorageOptions,
) -> (GrainStorage, Arc<MemoryStateStore>, Arc<MemoryCacheBackend>) {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(MemoryCacheBackend::new());
    let cache = Arc::new(StateCache::new(backend.clone(), KeySpace::new("c1")));
    let storage = GrainStorage::new("s1", "c1", options, store.clone(), Some(cache));
    (storage, store, backend)
}

// =============================================================================
// Write-Through
// =============================================================================

#[tokio::test]
async fn test_write_through_new_grain() {
    let (storage, store) = durable_only(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();

    assert!(slot.record_exists);
    let etag = slot.etag.clone().expect("etag set on write");

    let doc = store.document("c1_u_1", None).expect("document stored");
    assert_eq!(doc.data, json!({"n": "a", "v": 1}));
    assert_eq!(doc.etag().unwrap(), etag);

    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert!(read_slot.record_exists);
    assert_eq!(read_slot.data, Some(state("a", 1)));
    assert_eq!(read_slot.etag, Some(etag));
}

#[tokio::test]
async fn test_rewriting_same_payload_advances_etag() {
    let (storage, _store) = durable_only(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();
    let first = slot.etag.clone().unwrap();

    // Same payload, later revision instant.
    tokio::time::sleep(Duration::from_millis(5)).await;
    storage.write(&grain, &mut slot).await.unwrap();
    let second = slot.etag.clone().unwrap();

    assert_ne!(first, second);
}

#[tokio::test]
async fn test_clear_round_trip() {
    let (storage, store) = durable_only(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();
    storage.clear(&grain, &mut slot).await.unwrap();

    assert!(!slot.record_exists);
    assert!(slot.etag.is_none());
    assert!(slot.data.is_none());
    assert!(store.document("c1_u_1", None).is_none());

    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert!(!read_slot.record_exists);
    assert!(read_slot.etag.is_none());
    assert!(read_slot.data.is_none());
}

#[tokio::test]
async fn test_clear_drops_cache_entry() {
    let (storage, _store, _backend) = with_cache(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();
    storage.clear(&grain, &mut slot).await.unwrap();

    // A read-through read must not resurrect the cleared record.
    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert!(!read_slot.record_exists);
}

#[tokio::test]
async fn test_tenant_per_storage_routes_durable_sessions() {
    let options = StorageOptions {
        use_tenant_per_storage: true,
        ..Default::default()
    };
    let (storage, store) = durable_only(options);
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();

    assert!(store.document("c1_u_1", Some("s1")).is_some());
    assert!(store.document("c1_u_1", None).is_none());
}

// =============================================================================
// Optimistic Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrency_conflict_leaves_document_unchanged() {
    let (storage, store) = durable_only(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));
    storage.write(&grain, &mut slot).await.unwrap();

    // Another writer replaces the document behind this caller's back.
    let foreign = GrainStateDoc::new("c1_u_1", json!({"n": "x", "v": 9}), 9_999, "external");
    store.upsert(&foreign, None).await.unwrap();

    slot.data = Some(state("b", 2));
    let err = storage.write(&grain, &mut slot).await.unwrap_err();
    assert!(err.is_concurrency_conflict());

    let unchanged = store.document("c1_u_1", None).unwrap();
    assert_eq!(unchanged.data, json!({"n": "x", "v": 9}));
}

#[tokio::test]
async fn test_first_write_never_concurrency_checks() {
    let (storage, _store) = durable_only(StorageOptions::default());
    let grain = GrainId::new("u/1");

    let mut slot = StateSlot::with_data(state("a", 1));
    assert!(!slot.record_exists);
    assert!(slot.etag.is_none());

    storage.write(&grain, &mut slot).await.unwrap();
    assert!(slot.record_exists);
}

#[tokio::test]
async fn test_check_concurrency_disabled_overwrites() {
    let options = StorageOptions {
        check_concurrency: false,
        ..Default::default()
    };
    let (storage, store) = durable_only(options);
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));
    storage.write(&grain, &mut slot).await.unwrap();

    let foreign = GrainStateDoc::new("c1_u_1", json!({"n": "x", "v": 9}), 9_999, "external");
    store.upsert(&foreign, None).await.unwrap();

    slot.data = Some(state("b", 2));
    storage.write(&grain, &mut slot).await.unwrap();

    let doc = store.document("c1_u_1", None).unwrap();
    assert_eq!(doc.data, json!({"n": "b", "v": 2}));
}

// =============================================================================
// Legacy Id Migration
// =============================================================================

#[tokio::test]
async fn test_legacy_document_migrates_on_read() {
    let (storage, store) = durable_only(StorageOptions::default());
    let legacy = GrainStateDoc::new("TestState/migration-1", json!({"n": "old", "v": 5}), 1_000, "");
    store.upsert(&legacy, None).await.unwrap();

    let grain = GrainId::new("TestState/migration-1");
    let mut slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut slot).await;

    assert!(slot.record_exists);
    assert_eq!(slot.data, Some(state("old", 5)));
    let etag = slot.etag.clone().expect("fresh etag");

    let canonical = store
        .document("c1_TestState_migration-1", None)
        .expect("canonical document");
    assert_eq!(canonical.data, json!({"n": "old", "v": 5}));
    assert_eq!(canonical.etag().unwrap(), etag);
    assert!(store.document("TestState/migration-1", None).is_none());

    // Second read observes only the canonical id.
    let mut second = StateSlot::<TestState>::new();
    storage.read(&grain, &mut second).await;
    assert_eq!(second.data, Some(state("old", 5)));
}

#[tokio::test]
async fn test_duplicate_ids_after_partial_migration_read_cleanly() {
    // A failed migration second phase can leave both ids; reads must serve
    // the canonical document without erroring.
    let (storage, store) = durable_only(StorageOptions::default());
    store
        .upsert(
            &GrainStateDoc::new("c1_u_1", json!({"n": "new", "v": 2}), 2_000, ""),
            None,
        )
        .await
        .unwrap();
    store
        .upsert(
            &GrainStateDoc::new("u/1", json!({"n": "old", "v": 1}), 1_000, ""),
            None,
        )
        .await
        .unwrap();

    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut slot).await;

    assert_eq!(slot.data, Some(state("new", 2)));
}

// =============================================================================
// Read-Through
// =============================================================================

#[tokio::test]
async fn test_read_through_serves_cache_before_durable_store() {
    let (storage, store, _backend) = with_cache(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));
    storage.write(&grain, &mut slot).await.unwrap();

    // Mutate the durable store directly; the cached entry still wins.
    let foreign = GrainStateDoc::new("c1_u_1", json!({"n": "x", "v": 9}), 9_999, "external");
    store.upsert(&foreign, None).await.unwrap();

    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert_eq!(read_slot.data, Some(state("a", 1)));
}

#[tokio::test]
async fn test_read_through_disabled_reads_durable_store() {
    let options = StorageOptions {
        write_behind: WriteBehindOptions {
            enable_read_through: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let (storage, store, _backend) = with_cache(options);
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));
    storage.write(&grain, &mut slot).await.unwrap();

    let foreign = GrainStateDoc::new("c1_u_1", json!({"n": "x", "v": 9}), 9_999, "external");
    store.upsert(&foreign, None).await.unwrap();

    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert_eq!(read_slot.data, Some(state("x", 9)));
}

#[tokio::test]
async fn test_read_miss_warms_cache() {
    let (storage, store, _backend) = with_cache(StorageOptions::default());
    store
        .upsert(
            &GrainStateDoc::new(
                "c1_u_1",
                json!({"n": "a", "v": 1}),
                1_000,
                CacheEnvelope::type_token::<TestState>(),
            ),
            None,
        )
        .await
        .unwrap();

    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut slot).await;
    assert_eq!(slot.data, Some(state("a", 1)));

    // Durable store mutated after the warm; the next read hits the cache.
    store
        .upsert(
            &GrainStateDoc::new("c1_u_1", json!({"n": "x", "v": 9}), 9_999, ""),
            None,
        )
        .await
        .unwrap();

    let mut second = StateSlot::<TestState>::new();
    storage.read(&grain, &mut second).await;
    assert_eq!(second.data, Some(state("a", 1)));
}

/// State whose typed round trip adds a field the stored JSON omits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct WideState {
    n: String,
    v: i32,
    #[serde(default)]
    note: String,
}

#[tokio::test]
async fn test_warmed_entry_etag_matches_its_payload() {
    let (storage, store, backend) = with_cache(StorageOptions::default());
    store
        .upsert(
            &GrainStateDoc::new(
                "c1_u_1",
                json!({"n": "a", "v": 1}),
                1_000,
                CacheEnvelope::type_token::<WideState>(),
            ),
            None,
        )
        .await
        .unwrap();

    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::<WideState>::new();
    storage.read(&grain, &mut slot).await;
    assert!(slot.record_exists);

    // The warmed envelope carries the document's own bytes, and its token
    // verifies against those bytes, not a typed re-serialization.
    let raw = backend
        .hash_get("mgs:c1:s1:state", "u_1")
        .await
        .unwrap()
        .expect("warmed entry");
    let envelope: CacheEnvelope = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope.serialized_data, json!({"n": "a", "v": 1}).to_string());
    assert_eq!(
        envelope.e_tag,
        granary::etag::version_etag(envelope.last_modified, &envelope.serialized_data)
    );
    assert_eq!(Some(envelope.e_tag), slot.etag);

    // A concurrency-checked write against the warmed entry succeeds.
    slot.data = Some(WideState {
        n: "b".into(),
        v: 2,
        note: String::new(),
    });
    storage.write(&grain, &mut slot).await.unwrap();
    let doc = store.document("c1_u_1", None).unwrap();
    assert_eq!(doc.data, json!({"n": "b", "v": 2, "note": ""}));
}

// =============================================================================
// Write-Behind Overflow
// =============================================================================

#[tokio::test]
async fn test_overflow_write_lands_in_cache_only() {
    let (storage, store, backend) = with_cache(overflow_options());
    let grain = GrainId::new("u/2");
    let mut slot = StateSlot::with_data(state("w", 7));

    storage.write(&grain, &mut slot).await.unwrap();

    assert!(slot.record_exists);
    assert!(slot.etag.is_some());
    assert_eq!(store.document_count(), 0);
    assert_eq!(backend.set_members("mgs:c1:s1:dirty"), vec!["u_2".to_string()]);

    // The pending revision is served back on read.
    let mut read_slot = StateSlot::<TestState>::new();
    storage.read(&grain, &mut read_slot).await;
    assert_eq!(read_slot.data, Some(state("w", 7)));
    assert_eq!(read_slot.etag, slot.etag);
}

#[tokio::test]
async fn test_below_threshold_writes_through() {
    let (storage, store, backend) = with_cache(StorageOptions::default());
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();

    assert!(store.document("c1_u_1", None).is_some());
    assert!(backend.set_members("mgs:c1:s1:dirty").is_empty());
}

#[tokio::test]
async fn test_write_behind_disabled_always_writes_through() {
    let options = StorageOptions {
        write_behind: WriteBehindOptions {
            threshold: 0,
            enable_write_behind: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let (storage, store, backend) = with_cache(options);
    let grain = GrainId::new("u/1");
    let mut slot = StateSlot::with_data(state("a", 1));

    storage.write(&grain, &mut slot).await.unwrap();

    assert!(store.document("c1_u_1", None).is_some());
    assert!(backend.set_members("mgs:c1:s1:dirty").is_empty());
}

#[tokio::test]
async fn test_request_tenant_partitions_state_map() {
    let (storage, store, backend) = with_cache(StorageOptions::default());
    let grain = GrainId::new("u/1");

    granary::with_tenant("t1", async {
        let mut slot = StateSlot::with_data(state("a", 1));
        storage.write(&grain, &mut slot).await.unwrap();
    })
    .await;

    // The refresh landed in the tenant-scoped state map only.
    assert!(backend
        .hash_get("mgs:c1:s1:tenant:t1:state", "u_1")
        .await
        .unwrap()
        .is_some());
    assert!(backend
        .hash_get("mgs:c1:s1:state", "u_1")
        .await
        .unwrap()
        .is_none());
    assert!(store.document("c1_u_1", None).is_some());
}

#[tokio::test]
async fn test_tenant_scoped_write_is_never_absorbed() {
    let (storage, store, backend) = with_cache(overflow_options());
    let grain = GrainId::new("u/1");

    granary::with_tenant("t1", async {
        let mut slot = StateSlot::with_data(state("a", 1));
        storage.write(&grain, &mut slot).await.unwrap();
    })
    .await;

    // Overflow would strand the revision in a dirty set the drainer never
    // pops; the write goes through instead.
    assert!(store.document("c1_u_1", None).is_some());
    assert!(backend.set_members("mgs:c1:s1:tenant:t1:dirty").is_empty());
    assert!(backend.set_members("mgs:c1:s1:dirty").is_empty());
}

// =============================================================================
// Cache-Failure Fallback
// =============================================================================

/// Backend whose hash writes can be made to fail, for fallback tests.
struct FailingBackend {
    inner: MemoryCacheBackend,
    fail_hash_set: AtomicBool,
}

impl FailingBackend {
    fn new() -> Self {
        Self {
            inner: MemoryCacheBackend::new(),
            fail_hash_set: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if self.fail_hash_set.load(Ordering::SeqCst) {
            return Err(GranaryError::Cache("injected hash write failure".into()));
        }
        self.inner.hash_set(key, field, value, ttl).await
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<()> {
        self.inner.hash_del(key, field).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_remove(key, member).await
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        self.inner.set_pop(key, count).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.inner.increment(key, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_cache_failure_falls_through_to_durable_store() {
    let store = Arc::new(MemoryStateStore::new());
    let backend = Arc::new(FailingBackend::new());
    backend.fail_hash_set.store(true, Ordering::SeqCst);
    let cache = Arc::new(StateCache::new(backend.clone(), KeySpace::new("c1")));
    let storage = GrainStorage::new("s1", "c1", overflow_options(), store.clone(), Some(cache));

    let grain = GrainId::new("u/3");
    let mut slot = StateSlot::with_data(state("f", 1));

    // Overflow is in effect but the cache write fails: the write must still
    // succeed through the durable store.
    storage.write(&grain, &mut slot).await.unwrap();

    let doc = store.document("c1_u_3", None).expect("durable write happened");
    assert_eq!(doc.etag().unwrap(), slot.etag.clone().unwrap());
    assert!(backend.inner.set_members("mgs:c1:s1:dirty").is_empty());
}
