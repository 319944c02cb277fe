//! Granary - durable per-grain state store with a coalescing write-behind cache
//!
//! Each grain (a uniquely-addressable stateful entity owned by the host
//! runtime) has exactly one versioned state document. Clients issue three
//! operations: READ, WRITE, CLEAR. Under normal load the store is strongly
//! read-after-write consistent against a durable document database; under
//! write surges it absorbs traffic into a shared key/value cache and a
//! leased background drainer reconciles the cache back to the database.
//!
//! ## Components
//!
//! - **storage**: the READ/WRITE/CLEAR core with surge detection, optimistic
//!   concurrency enforcement, and legacy-id migration
//! - **cache**: typed state entries, dirty-set membership, the cluster-wide
//!   write counter, and the drain lease, all over a pluggable key/value
//!   backend
//! - **db**: durable document store adapters (MongoDB, in-memory)
//! - **drain**: periodic reconciliation of dirty entries under a
//!   cluster-wide lease
//! - **keys**: deterministic mapping of (cluster, storage, tenant, grain)
//!   to cache keys and document ids
//! - **etag**: content-derived version tokens

pub mod cache;
pub mod config;
pub mod db;
pub mod drain;
pub mod etag;
pub mod keys;
pub mod storage;
pub mod tenant;
pub mod types;

pub use cache::{CacheBackend, CacheEnvelope, MemoryCacheBackend, StateCache};
pub use config::{StorageOptions, WriteBehindOptions};
pub use db::{DocumentStore, GrainStateDoc, MemoryStateStore, MongoStateStore};
pub use drain::{DrainStats, Drainer, StorageRegistry};
pub use keys::{GrainId, KeySpace};
pub use storage::{GrainStorage, StateSlot};
pub use tenant::{current_tenant, with_tenant};
pub use types::{GranaryError, Result};
