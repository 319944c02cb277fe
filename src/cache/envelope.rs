//! Cached state envelope
//!
//! The JSON value stored per grain in a storage's state map. Field names
//! are camelCase on the wire; the payload itself is carried as a nested
//! canonical-JSON string plus a type token so a reader (or the drainer)
//! can decide what to do with it without a shared type dictionary.

use serde::{Deserialize, Serialize};

/// One cached state revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope {
    /// Canonical JSON of the payload
    pub serialized_data: String,
    /// Payload type token; gates typed deserialization
    pub type_string: String,
    /// Version token of this revision
    pub e_tag: String,
    /// Revision instant, unix milliseconds
    pub last_modified: i64,
}

impl CacheEnvelope {
    /// The type token recorded for payloads of type `T`.
    pub fn type_token<T>() -> &'static str {
        std::any::type_name::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let envelope = CacheEnvelope {
            serialized_data: r#"{"v":1}"#.to_string(),
            type_string: "demo::State".to_string(),
            e_tag: "abc".to_string(),
            last_modified: 1234,
        };

        let value = serde_json::to_value(&envelope).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("serializedData"));
        assert!(object.contains_key("typeString"));
        assert!(object.contains_key("eTag"));
        assert!(object.contains_key("lastModified"));
    }

    #[test]
    fn test_roundtrip() {
        let envelope = CacheEnvelope {
            serialized_data: r#"{"n":"a"}"#.to_string(),
            type_string: CacheEnvelope::type_token::<String>().to_string(),
            e_tag: "etag-1".to_string(),
            last_modified: 42,
        };

        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: CacheEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, envelope);
    }
}
