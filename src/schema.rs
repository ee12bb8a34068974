//! Schema registry for collection metadata.
//!
//! Each schema-bearing collection declares the metadata fields its chunks may carry, a
//! natural-language hint telling the LLM when to use them, and optional per-field value
//! normalizers that align extracted values with what is stored (e.g. "New York" -> "NY").
//! One generic validator evaluates the tagged field descriptors, so adding a collection means
//! adding a registry entry and nothing else.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Type tag for a declared metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free-form string value.
    Text,
    /// Numeric value; strings that parse as numbers are coerced.
    Number,
}

/// Validated scalar metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text value, trimmed and normalized.
    Text(String),
    /// Numeric value.
    Number(f64),
}

impl FieldValue {
    /// Render the value as the JSON scalar persisted in chunk payloads and filters.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

/// Declared metadata field: name, type tag, and optional value normalizer.
pub struct FieldDef {
    /// Field name as it appears in chunk payloads and filters.
    pub name: &'static str,
    /// Type tag controlling coercion.
    pub kind: FieldKind,
    /// Optional canonicalizer applied after coercion.
    pub normalizer: Option<fn(&str) -> String>,
}

/// Metadata schema for one collection.
pub struct CollectionSchema {
    /// Collection this schema applies to.
    pub collection_name: &'static str,
    /// Ordered field declarations.
    pub fields: Vec<FieldDef>,
    /// Guidance for the LLM on when each filter applies.
    pub hint: &'static str,
}

impl CollectionSchema {
    /// Comma-separated field names, used in extraction prompts.
    pub fn field_names(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Validate a raw key/value mapping against this schema.
    ///
    /// Unknown keys are dropped, values are coerced per field kind, and the field normalizer is
    /// applied when present. A value that fails validation omits just that field rather than
    /// failing the whole mapping: a missing filter degrades to a wider search, while a wrong one
    /// produces zero-result dead ends.
    pub fn validate(&self, raw: &Map<String, Value>) -> BTreeMap<String, FieldValue> {
        let mut validated = BTreeMap::new();
        for field in &self.fields {
            let Some(value) = raw.get(field.name) else {
                continue;
            };
            if let Some(coerced) = coerce(field, value) {
                validated.insert(field.name.to_string(), coerced);
            }
        }
        validated
    }

    /// One-line hint injected into the grounded-answer prompt for this collection.
    pub fn answer_hint(&self) -> String {
        format!(
            "Schema hints (these filters scoped the context): {}: filters [{}]. {}",
            self.collection_name,
            self.field_names(),
            self.hint
        )
    }
}

fn coerce(field: &FieldDef, value: &Value) -> Option<FieldValue> {
    match field.kind {
        FieldKind::Text => {
            let text = value.as_str()?.trim();
            if text.is_empty() {
                return None;
            }
            let normalized = match field.normalizer {
                Some(normalize) => normalize(text),
                None => text.to_string(),
            };
            Some(FieldValue::Text(normalized))
        }
        FieldKind::Number => {
            if let Some(number) = value.as_f64() {
                return Some(FieldValue::Number(number));
            }
            let text = value.as_str()?.trim();
            text.parse::<f64>().ok().map(FieldValue::Number)
        }
    }
}

fn normalize_city(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "new york" | "new york city" | "ny" => "NY".to_string(),
        "los angeles" | "la" => "LA".to_string(),
        "san francisco" | "sf" => "SF".to_string(),
        other => other.to_uppercase(),
    }
}

static REGISTRY: LazyLock<Vec<CollectionSchema>> = LazyLock::new(|| {
    vec![
        CollectionSchema {
            collection_name: "policy_collection",
            fields: vec![
                FieldDef {
                    name: "city",
                    kind: FieldKind::Text,
                    normalizer: Some(normalize_city),
                },
                FieldDef {
                    name: "department",
                    kind: FieldKind::Text,
                    normalizer: None,
                },
            ],
            hint: "Use city and department whenever the user mentions a location or a specific \
                   team to ensure they don't see another office's policy.",
        },
        CollectionSchema {
            collection_name: "product_catalog_collection",
            fields: vec![
                FieldDef {
                    name: "product_id",
                    kind: FieldKind::Text,
                    normalizer: None,
                },
                FieldDef {
                    name: "region",
                    kind: FieldKind::Text,
                    normalizer: None,
                },
            ],
            hint: "If a product code is mentioned (e.g. A99), extract it into product_id. \
                   Always filter by region if the user specifies their location.",
        },
    ]
});

/// Look up the schema for a collection. Absence means pure semantic search for that collection.
pub fn schema_for(collection_name: &str) -> Option<&'static CollectionSchema> {
    REGISTRY
        .iter()
        .find(|schema| schema.collection_name == collection_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn validate_drops_unknown_fields() {
        let schema = schema_for("policy_collection").expect("schema");
        let validated = schema.validate(&raw(json!({
            "city": "New York",
            "salary": 90000,
            "made_up": "value"
        })));

        assert_eq!(validated.len(), 1);
        assert_eq!(
            validated.get("city"),
            Some(&FieldValue::Text("NY".to_string()))
        );
    }

    #[test]
    fn validate_normalizes_city_aliases() {
        let schema = schema_for("policy_collection").expect("schema");
        for alias in ["new york", "New York City", "NY"] {
            let validated = schema.validate(&raw(json!({ "city": alias })));
            assert_eq!(
                validated.get("city"),
                Some(&FieldValue::Text("NY".to_string())),
                "alias {alias} should normalize"
            );
        }
    }

    #[test]
    fn validate_omits_invalid_values_instead_of_failing() {
        let schema = schema_for("policy_collection").expect("schema");
        let validated = schema.validate(&raw(json!({
            "city": 42,
            "department": "HR"
        })));

        assert_eq!(validated.len(), 1);
        assert_eq!(
            validated.get("department"),
            Some(&FieldValue::Text("HR".to_string()))
        );
    }

    #[test]
    fn validate_skips_null_and_empty_values() {
        let schema = schema_for("product_catalog_collection").expect("schema");
        let validated = schema.validate(&raw(json!({
            "product_id": null,
            "region": "   "
        })));
        assert!(validated.is_empty());
    }

    #[test]
    fn number_fields_coerce_numeric_strings() {
        let schema = CollectionSchema {
            collection_name: "test_collection",
            fields: vec![FieldDef {
                name: "year",
                kind: FieldKind::Number,
                normalizer: None,
            }],
            hint: "",
        };
        let validated = schema.validate(&raw(json!({ "year": "2024" })));
        assert_eq!(validated.get("year"), Some(&FieldValue::Number(2024.0)));
    }

    #[test]
    fn unknown_collection_has_no_schema() {
        assert!(schema_for("unclassified_knowledge").is_none());
    }

    #[test]
    fn answer_hint_names_fields() {
        let schema = schema_for("product_catalog_collection").expect("schema");
        let hint = schema.answer_hint();
        assert!(hint.contains("product_id, region"));
        assert!(hint.contains("product_catalog_collection"));
    }
}
