//! Storage configuration
//!
//! Per-storage tuning for concurrency enforcement, tenancy, and the
//! write-behind path. Defaults are production values; `from_env` overrides
//! individual knobs for deployment without a config file.

use std::time::Duration;

/// Options for one named grain storage
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Open every durable store session with tenant = storage-name
    pub use_tenant_per_storage: bool,
    /// Enforce ETag match on write-through updates
    pub check_concurrency: bool,
    /// Surge absorption and drainage tuning
    pub write_behind: WriteBehindOptions,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            use_tenant_per_storage: false,
            check_concurrency: true,
            write_behind: WriteBehindOptions::default(),
        }
    }
}

impl StorageOptions {
    /// Create options from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("GRANARY_TENANT_PER_STORAGE") {
            if let Ok(enabled) = val.parse::<bool>() {
                options.use_tenant_per_storage = enabled;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_CHECK_CONCURRENCY") {
            if let Ok(enabled) = val.parse::<bool>() {
                options.check_concurrency = enabled;
            }
        }

        options.write_behind = WriteBehindOptions::from_env();
        options
    }
}

/// Write-behind tuning for one storage
#[derive(Debug, Clone)]
pub struct WriteBehindOptions {
    /// Cluster-wide writes/sec at which overflow engages (strictly greater-than)
    pub threshold: i64,
    /// Maximum dirty entries popped per drain cycle per storage
    pub batch_size: usize,
    /// Interval between drain cycles, seconds
    pub drain_interval_secs: u64,
    /// TTL applied to the state map on every write, seconds (0 = no expiration)
    pub state_ttl_secs: u64,
    /// Drain lease lifetime, seconds
    pub drain_lock_ttl_secs: u64,
    /// Gate the overflow path; when false, writes always go through to the
    /// durable store
    pub enable_write_behind: bool,
    /// Gate the cache-first read
    pub enable_read_through: bool,
}

impl Default for WriteBehindOptions {
    fn default() -> Self {
        Self {
            threshold: 100,
            batch_size: 50,
            drain_interval_secs: 5,
            state_ttl_secs: 300,
            drain_lock_ttl_secs: 30,
            enable_write_behind: true,
            enable_read_through: true,
        }
    }
}

impl WriteBehindOptions {
    /// Create options from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("GRANARY_WRITE_THRESHOLD") {
            if let Ok(threshold) = val.parse::<i64>() {
                options.threshold = threshold;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_DRAIN_BATCH_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                options.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_DRAIN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                options.drain_interval_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_STATE_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                options.state_ttl_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_DRAIN_LOCK_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                options.drain_lock_ttl_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_WRITE_BEHIND") {
            if let Ok(enabled) = val.parse::<bool>() {
                options.enable_write_behind = enabled;
            }
        }

        if let Ok(val) = std::env::var("GRANARY_READ_THROUGH") {
            if let Ok(enabled) = val.parse::<bool>() {
                options.enable_read_through = enabled;
            }
        }

        options
    }

    /// State map TTL, or None when expiration is disabled
    pub fn state_ttl(&self) -> Option<Duration> {
        (self.state_ttl_secs > 0).then(|| Duration::from_secs(self.state_ttl_secs))
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn drain_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.drain_lock_ttl_secs)
    }
}
