//! Helpers for constructing chunk payloads and deterministic point ids.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::schema::FieldValue;

/// Derive the stable point id for a chunk from its document fingerprint and position.
///
/// Redelivered tasks upsert the same ids in place, so a crash between the vector write and the
/// idempotency record cannot duplicate chunks on replay.
pub fn stable_chunk_id(fingerprint: &str, chunk_index: usize) -> String {
    let digest = Sha256::digest(format!("{fingerprint}:{chunk_index}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Build the metadata stored alongside each chunk vector.
///
/// Metadata is always the owning collection tag plus the schema-validated fields; unknown
/// fields never reach this function. The chunk text is not part of the metadata: the store
/// client adds it under the reserved `text` key when the point is written and splits it back
/// out on retrieval.
pub fn build_chunk_metadata(
    collection_name: &str,
    fields: &BTreeMap<String, FieldValue>,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "collection".into(),
        Value::String(collection_name.to_string()),
    );
    for (name, value) in fields {
        metadata.insert(name.clone(), value.to_json());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_chunk_id_is_deterministic() {
        let first = stable_chunk_id("abc123", 0);
        let second = stable_chunk_id("abc123", 0);
        assert_eq!(first, second);
        assert_ne!(first, stable_chunk_id("abc123", 1));
        assert_ne!(first, stable_chunk_id("def456", 0));
    }

    #[test]
    fn stable_chunk_id_is_a_uuid() {
        let id = stable_chunk_id("abc123", 3);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn metadata_contains_collection_tag_and_fields_only() {
        let mut fields = BTreeMap::new();
        fields.insert("city".to_string(), FieldValue::Text("NY".to_string()));

        let metadata = build_chunk_metadata("policy_collection", &fields);

        assert_eq!(
            metadata.get("collection"),
            Some(&Value::String("policy_collection".into()))
        );
        assert_eq!(metadata.get("city"), Some(&Value::String("NY".into())));
        // The reserved text key belongs to the store client, not the metadata.
        assert!(!metadata.contains_key("text"));
        assert_eq!(metadata.len(), 2, "collection tag and schema field only");
    }
}
