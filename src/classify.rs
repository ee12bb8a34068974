//! Collection routing for documents and queries.
//!
//! The LLM is prompted with a bounded sample and the candidate collection list; its answer is
//! parsed defensively. Anything that is not a known existing name or a well-formed new-name
//! pattern collapses to [`Classification::Unclassified`], which the callers route to the
//! configured fallback collection. Routing therefore never fails.

use crate::llm::CompletionClient;
use crate::prompts;

/// Maximum number of words sampled from a document for classification.
pub const SAMPLE_WORDS: usize = 1000;
/// Hard cap on excerpt characters sent to the LLM.
const MAX_EXCERPT_CHARS: usize = 8000;
/// Hard cap on query characters sent to the LLM.
const MAX_QUERY_CHARS: usize = 2000;

const UNCLASSIFIED: &str = "UNCLASSIFIED";

/// Outcome of routing a document or query to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The content belongs to an existing collection, named exactly as stored.
    Existing(String),
    /// The content fits a new category; the name is a normalized snake_case identifier.
    New(String),
    /// The content could not be routed; callers use the fallback collection.
    Unclassified,
}

impl Classification {
    /// Resolve the routed collection name, substituting `fallback` for unclassified content.
    pub fn into_collection_name(self, fallback: &str) -> String {
        match self {
            Classification::Existing(name) | Classification::New(name) => name,
            Classification::Unclassified => fallback.to_string(),
        }
    }
}

/// Route a document sample to an existing collection, a new collection name, or unclassified.
pub async fn classify_document(
    llm: &dyn CompletionClient,
    sample_text: &str,
    existing_collections: &[String],
) -> Classification {
    let excerpt = truncate_chars(sample_text, MAX_EXCERPT_CHARS);
    let candidates = candidate_list(existing_collections);
    let prompt = prompts::classify_document(&candidates, excerpt);

    match llm.complete(&prompt).await {
        Ok(raw) => parse_document_classification(&raw, existing_collections),
        Err(error) => {
            tracing::warn!(error = %error, "Document classification failed; using fallback");
            Classification::Unclassified
        }
    }
}

/// Route a user query to one existing collection. Queries never create new collections.
pub async fn classify_query(
    llm: &dyn CompletionClient,
    user_query: &str,
    existing_collections: &[String],
) -> Classification {
    if existing_collections.is_empty() {
        return Classification::Unclassified;
    }
    let query = truncate_chars(user_query.trim(), MAX_QUERY_CHARS);
    let candidates = candidate_list(existing_collections);
    let prompt = prompts::classify_query(&candidates, query);

    match llm.complete(&prompt).await {
        Ok(raw) => parse_query_classification(&raw, existing_collections),
        Err(error) => {
            tracing::warn!(error = %error, "Query routing failed; using fallback");
            Classification::Unclassified
        }
    }
}

/// Concatenate the first `n` words of a document for classification sampling.
pub fn bounded_sample(text: &str, n: usize) -> String {
    text.split_whitespace()
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a document-classification completion into a routing decision.
pub fn parse_document_classification(raw: &str, existing: &[String]) -> Classification {
    let answer = raw.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case(UNCLASSIFIED) {
        return Classification::Unclassified;
    }

    if let Some(name) = match_existing(answer, existing) {
        return Classification::Existing(name);
    }

    match normalize_collection_name(answer) {
        Some(name) => Classification::New(name),
        None => Classification::Unclassified,
    }
}

/// Parse a query-routing completion. Only existing names are accepted.
pub fn parse_query_classification(raw: &str, existing: &[String]) -> Classification {
    let answer = raw.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case(UNCLASSIFIED) {
        return Classification::Unclassified;
    }

    match match_existing(answer, existing) {
        Some(name) => Classification::Existing(name),
        None => Classification::Unclassified,
    }
}

fn candidate_list(existing: &[String]) -> String {
    if existing.is_empty() {
        "(none)".to_string()
    } else {
        existing.join(", ")
    }
}

fn match_existing(answer: &str, existing: &[String]) -> Option<String> {
    let normalized_answer = comparable(answer);
    if normalized_answer.is_empty() {
        return None;
    }
    existing
        .iter()
        .find(|name| comparable(name) == normalized_answer)
        .cloned()
}

/// Collapse a name to lowercase alphanumerics for comparison, so "Policy Collection" and
/// `policy_collection` compare equal.
fn comparable(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Normalize an LLM-suggested collection name to a snake_case identifier ending in
/// `_collection`. Returns `None` when nothing usable remains.
pub fn normalize_collection_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let name = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_lowercase();

    if name.is_empty() || name.eq_ignore_ascii_case(UNCLASSIFIED) {
        return None;
    }

    if name.contains("_collection") {
        Some(name)
    } else {
        Some(format!("{name}_collection"))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
