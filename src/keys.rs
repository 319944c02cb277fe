//! Grain identity and key derivation
//!
//! Deterministic mapping of (cluster, storage, tenant, grain) to cache keys
//! and durable document ids. All functions here are pure; the formats are a
//! wire contract shared by every process in the cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tenant::current_tenant;

/// Separator between the type prefix and key of a grain identifier
const GRAIN_SEPARATOR: char = '/';
/// Cache-safe replacement for the separator
const SAFE_SEPARATOR: char = '_';
/// Namespace prefix for every cache key
const KEY_PREFIX: &str = "mgs";

/// A grain identifier: an opaque two-part `{type-prefix}/{key}` string.
///
/// The core never interprets the parts; it only rewrites the separator into
/// the cache-safe form and back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrainId(String);

impl GrainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cache-safe form: the separator replaced by an underscore.
    pub fn cache_key(&self) -> String {
        self.0.replace(GRAIN_SEPARATOR, &SAFE_SEPARATOR.to_string())
    }

    /// Rebuild a grain id from its cache-safe form.
    ///
    /// The first underscore is the separator; type prefixes never contain
    /// underscores.
    pub fn from_cache_key(key: &str) -> Self {
        Self(key.replacen(SAFE_SEPARATOR, &GRAIN_SEPARATOR.to_string(), 1))
    }

    /// The raw grain id doubles as the legacy document id, recognised on
    /// read only.
    pub fn legacy_document_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GrainId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Key derivation scoped to a cluster.
///
/// State map and dirty set keys carry the request tenant when one is in
/// scope; the write counter and drain lease are cluster-global per storage
/// and never carry a tenant component.
#[derive(Debug, Clone)]
pub struct KeySpace {
    cluster: String,
}

impl KeySpace {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Canonical durable document id: `{cluster}_{grain-with-underscores}`.
    pub fn document_id(&self, grain: &GrainId) -> String {
        format!("{}_{}", self.cluster, grain.cache_key())
    }

    fn scope(&self, storage: &str, tenant: Option<&str>) -> String {
        match tenant {
            Some(t) if !t.is_empty() => {
                format!("{KEY_PREFIX}:{}:{}:tenant:{}", self.cluster, storage, t)
            }
            _ => format!("{KEY_PREFIX}:{}:{}", self.cluster, storage),
        }
    }

    /// Hash of `{grain-key} -> JSON envelope` for a storage.
    pub fn state_map_key(&self, storage: &str, tenant: Option<&str>) -> String {
        format!("{}:state", self.scope(storage, tenant))
    }

    /// Set of grain keys whose latest value lives only in the cache.
    pub fn dirty_set_key(&self, storage: &str, tenant: Option<&str>) -> String {
        format!("{}:dirty", self.scope(storage, tenant))
    }

    /// State map key for the tenant currently in scope.
    pub fn state_map_key_scoped(&self, storage: &str) -> String {
        self.state_map_key(storage, current_tenant().as_deref())
    }

    /// Dirty set key for the tenant currently in scope.
    pub fn dirty_set_key_scoped(&self, storage: &str) -> String {
        self.dirty_set_key(storage, current_tenant().as_deref())
    }

    /// Cluster-wide write counter for a storage. Tenantless: surge detection
    /// spans all tenants.
    pub fn write_counter_key(&self, storage: &str) -> String {
        format!("{KEY_PREFIX}:{}:{}:wcount", self.cluster, storage)
    }

    /// Drain lease for a storage. Tenantless.
    pub fn drain_lease_key(&self, storage: &str) -> String {
        format!("{KEY_PREFIX}:{}:{}:drain-lock", self.cluster, storage)
    }
}
