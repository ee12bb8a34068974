//! Prompt assembly for every LLM-dependent step.
//!
//! The grounded-answer instruction locks the model to the retrieved context: when the answer is
//! not present it must emit the refusal phrase instead of drawing on outside knowledge.

/// Fixed refusal returned when no retrieved context survives threshold filtering.
pub const REFUSAL_ANSWER: &str = "I cannot find that in the knowledge base.";

const ANSWER_SYSTEM: &str = "You are a knowledge base assistant. Use ONLY the provided context to answer.\nIf the answer is not in the context, say: \"I cannot find that in the knowledge base.\"\nDo not use outside knowledge. Do not make up details.";

const CLASSIFY_DOCUMENT_SYSTEM: &str = "You are a document classifier. Your job is to decide which knowledge collection a document belongs to.\n\nGiven:\n1) A short excerpt from a document.\n2) A list of existing collection names (if any).\n\nYou must reply with EXACTLY one of:\n- One of the existing collection names exactly as written (if the document clearly fits that collection), OR\n- A new collection name in snake_case ending with _collection (e.g. company_policy_collection, invoice_collection) if the document fits a new category, OR\n- The word UNCLASSIFIED if the document does not clearly fit any category and you cannot suggest a meaningful new one.\n\nReply with ONLY the collection name or UNCLASSIFIED. No explanation, no quotes, no punctuation after the name.";

const CLASSIFY_QUERY_SYSTEM: &str = "You are a query router. Given a user search query or question and a list of existing knowledge collections, decide which single collection is most likely to contain the answer.\n\nRules:\n- Reply with EXACTLY one existing collection name as written in the list (if the query clearly relates to that collection), OR\n- Reply with the word UNCLASSIFIED if the query does not clearly relate to any of the listed collections.\n\nDo NOT suggest new collection names. Do NOT explain. Reply with ONLY the collection name or UNCLASSIFIED.";

const EXTRACT_METADATA_SYSTEM: &str = "You are a metadata extractor. Given a document excerpt and a list of metadata field names, extract values for those fields from the document. Use short, normalized values (e.g. city code 'NY' not 'New York'). If a value cannot be determined, omit the key or use null. Reply with ONLY a valid JSON object, no other text.";

const EXTRACT_FILTER_SYSTEM: &str = "You extract filter values from a user query for a document search. You are given the allowed filter field names for the current collection and a hint on when to use them. Output ONLY a JSON object with those field names as keys and extracted values (or null if not mentioned). Use short, normalized values. If the user does not mention a filter, do not include it or set it to null. Reply with ONLY valid JSON, no explanation.";

const EXPAND_QUERY_SYSTEM: &str = "You are a query expander for a document search system. Given a user question, output 2 to 3 alternative phrasings or related questions that could help find the same information in documents (rephrasing, synonyms, or sub-questions). Output ONLY the alternative queries, one per line, no numbering or bullets. Keep each line concise. Include the original question as the first line.";

/// Prompt for routing a document excerpt to a collection.
pub fn classify_document(existing_collections: &str, excerpt: &str) -> String {
    format!(
        "{CLASSIFY_DOCUMENT_SYSTEM}\n\nExisting collections: {existing_collections}\n\nDocument excerpt:\n{excerpt}"
    )
}

/// Prompt for routing a user query to an existing collection.
pub fn classify_query(existing_collections: &str, user_query: &str) -> String {
    format!(
        "{CLASSIFY_QUERY_SYSTEM}\n\nExisting collections: {existing_collections}\n\nUser query: {user_query}"
    )
}

/// Prompt for extracting schema metadata values from a document excerpt.
pub fn extract_metadata(field_names: &str, excerpt: &str) -> String {
    format!(
        "{EXTRACT_METADATA_SYSTEM}\n\nMetadata fields to extract: {field_names}\n\nDocument excerpt:\n{excerpt}"
    )
}

/// Prompt for extracting filter values from a user query.
pub fn extract_filter(field_names: &str, schema_hint: &str, user_query: &str) -> String {
    format!(
        "{EXTRACT_FILTER_SYSTEM}\n\nAllowed filters: {field_names}\nHint: {schema_hint}\n\nUser query: {user_query}"
    )
}

/// Prompt for generating alternative phrasings of a question.
pub fn expand_query(question: &str) -> String {
    format!("{EXPAND_QUERY_SYSTEM}\n\nQuestion: {question}")
}

/// Prompt for the grounded answer call.
///
/// `schema_hint` is empty for collections without a schema; otherwise it tells the model which
/// filters scoped the retrieved context.
pub fn grounded_answer(schema_hint: &str, context: &str, question: &str) -> String {
    format!("{ANSWER_SYSTEM}\n\n{schema_hint}\n\nContext:\n{context}\n\nQuestion: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_document_includes_candidates_and_excerpt() {
        let prompt = classify_document("policy_collection, product_catalog_collection", "Payroll");
        assert!(prompt.contains("policy_collection, product_catalog_collection"));
        assert!(prompt.contains("Payroll"));
        assert!(prompt.contains("UNCLASSIFIED"));
    }

    #[test]
    fn grounded_answer_embeds_context_and_refusal_instruction() {
        let prompt = grounded_answer("", "chunk one\n\nchunk two", "What is the policy?");
        assert!(prompt.contains("chunk one"));
        assert!(prompt.contains(REFUSAL_ANSWER));
        assert!(prompt.contains("What is the policy?"));
    }
}
