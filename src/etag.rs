//! Content-derived version tokens
//!
//! A version token is base64(SHA-256("{lastModifiedMs}_{canonicalJson}")).
//! It is never stored; both tiers recompute it on demand from the revision
//! instant and the payload, so a token computed against the cache and one
//! computed against the durable store agree for the same revision.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::Result;

/// Deterministic JSON rendering of a payload.
///
/// Round-trips through `serde_json::Value` so that object keys serialize in
/// sorted order regardless of field order in the source type.
pub fn canonical_json<T: Serialize>(data: &T) -> Result<String> {
    let value = serde_json::to_value(data)?;
    Ok(sort_keys(value).to_string())
}

/// Recursively sorts object keys.
///
/// `serde_json::Value`'s map type preserves insertion order when the
/// `preserve_order` feature is enabled transitively (e.g. by `bson`), so we
/// sort explicitly rather than relying on the feature set of the build.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Compute the version token for a document revision.
pub fn version_etag(last_modified_ms: i64, canonical_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(last_modified_ms.to_string().as_bytes());
    hasher.update(b"_");
    hasher.update(canonical_json.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}
