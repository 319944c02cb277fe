//! Grain state document schema

use serde::{Deserialize, Serialize};

use crate::etag::{canonical_json, version_etag};
use crate::types::Result;

/// The single versioned state document of a grain.
///
/// The version token is derived from (`last_modified`, `data`) on demand
/// and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrainStateDoc {
    /// Canonical id: `{cluster}_{grain-with-underscores}`. Legacy documents
    /// carry the raw grain id instead and are migrated on read.
    #[serde(rename = "_id")]
    pub id: String,

    /// The payload; opaque to the store
    pub data: serde_json::Value,

    /// Creation instant of this revision, unix milliseconds
    pub last_modified: i64,

    /// Payload type token, carried through from the cache envelope
    #[serde(default)]
    pub type_string: String,
}

impl GrainStateDoc {
    pub fn new(
        id: impl Into<String>,
        data: serde_json::Value,
        last_modified: i64,
        type_string: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            data,
            last_modified,
            type_string: type_string.into(),
        }
    }

    /// Recompute the version token of this revision.
    pub fn etag(&self) -> Result<String> {
        Ok(version_etag(self.last_modified, &canonical_json(&self.data)?))
    }
}
