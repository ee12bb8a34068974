//! Schema-aware extraction of structured values from unstructured text.
//!
//! Two callers share this machinery: filter extraction turns a user query into a store filter
//! after routing picks the collection, and metadata extraction pulls the same schema fields out
//! of a document at ingestion time. Malformed model output is an expected outcome here, not an
//! error: every parse failure degrades to "no fields" and the operation continues unfiltered.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::llm::CompletionClient;
use crate::prompts;
use crate::schema::{CollectionSchema, FieldValue, schema_for};
use crate::vector::build_metadata_filter;

const MAX_QUERY_CHARS: usize = 2000;
const MAX_EXCERPT_CHARS: usize = 8000;

/// Extract a schema-validated metadata filter from a user query.
///
/// Returns `None` when the collection has no schema (pure semantic search), when the model
/// output cannot be parsed, or when no field survives validation. An empty-but-present filter
/// is never produced.
pub async fn extract_query_filter(
    llm: &dyn CompletionClient,
    user_query: &str,
    collection_name: &str,
) -> Option<Value> {
    let schema = schema_for(collection_name)?;
    let query = truncate_chars(user_query.trim(), MAX_QUERY_CHARS);
    let prompt = prompts::extract_filter(&schema.field_names(), schema.hint, query);

    let raw = match llm.complete(&prompt).await {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(error = %error, collection = collection_name, "Filter extraction failed; searching unfiltered");
            return None;
        }
    };

    let parsed = parse_json_object(&raw)?;
    let validated = schema.validate(&parsed);
    build_metadata_filter(&validated)
}

/// Extract schema metadata values from a document excerpt at ingestion time.
///
/// An empty map means the chunks carry only the collection tag; the document is still stored.
pub async fn extract_document_metadata(
    llm: &dyn CompletionClient,
    excerpt: &str,
    schema: &CollectionSchema,
) -> BTreeMap<String, FieldValue> {
    let excerpt = truncate_chars(excerpt, MAX_EXCERPT_CHARS);
    let prompt = prompts::extract_metadata(&schema.field_names(), excerpt);

    let raw = match llm.complete(&prompt).await {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(error = %error, collection = schema.collection_name, "Metadata extraction failed; storing untagged chunks");
            return BTreeMap::new();
        }
    };

    match parse_json_object(&raw) {
        Some(parsed) => schema.validate(&parsed),
        None => BTreeMap::new(),
    }
}

/// Parse a completion as a flat JSON object, tolerating fenced code blocks and arbitrary
/// non-conforming text.
pub(crate) fn parse_json_object(raw: &str) -> Option<Map<String, Value>> {
    let stripped = strip_code_fences(raw.trim());
    match serde_json::from_str::<Value>(stripped) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw;
    if let Some(rest) = text.strip_prefix("```") {
        // Drop an optional language tag on the opening fence.
        text = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    text.trim()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
