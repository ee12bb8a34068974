//! Translation of validated metadata fields into store filter payloads.

use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::schema::FieldValue;

/// Compose the store filter payload from validated metadata fields.
///
/// Returns `None` when no fields survive validation: an absent filter and an empty filter
/// object are distinct to the store, and an empty object can mean "match nothing".
pub fn build_metadata_filter(fields: &BTreeMap<String, FieldValue>) -> Option<Value> {
    let must: Vec<Value> = fields
        .iter()
        .map(|(name, value)| {
            json!({
                "key": name,
                "match": { "value": value.to_json() }
            })
        })
        .collect();

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}
