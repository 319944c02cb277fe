//! Key/value cache backend contract
//!
//! The raw operations the storage tier requires of its cache engine: hash
//! fields with an optional whole-key TTL, sets with atomic pop, a counter
//! whose first increment arms an expiration, and a conditional set used as
//! a lease. Transport failures surface as `GranaryError::Cache`; the typed
//! adapter above decides which of them are swallowed.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::Result;

/// Contract required of the cache engine
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a hash field.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set a hash field. When `ttl` is given, (re)applies it to the whole
    /// hash key.
    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Delete a hash field.
    async fn hash_del(&self, key: &str, field: &str) -> Result<()>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// Atomically remove and return up to `count` members. Returned members
    /// are gone from the set even if the caller crashes before acting.
    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>>;

    /// Atomic increment. The increment that creates the key applies `ttl`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Set `key` to `value` only when absent, expiring after `ttl`.
    /// Returns whether the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Unconditional delete of a key.
    async fn delete(&self, key: &str) -> Result<()>;
}
