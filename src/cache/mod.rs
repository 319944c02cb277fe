//! Cache tier
//!
//! The shared key/value cache is the cluster's only coordination surface:
//! it holds the per-storage state map, the dirty set, the cluster-wide
//! write counter, and the drain lease. Engines plug in behind the
//! [`CacheBackend`] contract; [`MemoryCacheBackend`] ships in-process for
//! tests and single-process deployments. [`StateCache`] layers the typed
//! adapter the storage core talks to, including its error policy.

mod backend;
mod envelope;
mod memory;
mod state_cache;

pub use backend::CacheBackend;
pub use envelope::CacheEnvelope;
pub use memory::{spawn_cache_cleanup_task, MemoryCacheBackend};
pub use state_cache::{CacheStats, CachedState, StateCache};
