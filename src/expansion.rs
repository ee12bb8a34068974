//! Query expansion and fan-out result merging.
//!
//! Expansion widens retrieval recall by asking the LLM for alternative phrasings; the merge
//! step deduplicates the fan-out results by chunk identity, keeping the best (lowest) distance.
//! Min is commutative and associative, so the merged set is deterministic regardless of the
//! order in which per-query retrievals complete.

use std::collections::HashMap;

use crate::llm::CompletionClient;
use crate::prompts;
use crate::vector::RetrievedChunk;

/// Generate up to `max_queries` phrasings of a question, the original always first.
///
/// Parse failures and provider errors yield a singleton set containing only the original
/// question; expansion never fails the caller.
pub async fn expand(
    llm: &dyn CompletionClient,
    question: &str,
    max_queries: usize,
) -> Vec<String> {
    if max_queries <= 1 {
        return vec![question.to_string()];
    }

    let prompt = prompts::expand_query(question);
    match llm.complete(&prompt).await {
        Ok(raw) => parse_expansion(&raw, question, max_queries),
        Err(error) => {
            tracing::warn!(error = %error, "Query expansion failed; retrieving with original only");
            vec![question.to_string()]
        }
    }
}

/// Parse an expansion completion into an ordered, deduplicated query set.
pub fn parse_expansion(raw: &str, question: &str, max_queries: usize) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();

    for line in raw.lines() {
        let candidate = line
            .trim()
            .trim_start_matches(|c: char| {
                c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')' | ' ')
            })
            .trim();
        if candidate.is_empty() || queries.iter().any(|q| q == candidate) {
            continue;
        }
        queries.push(candidate.to_string());
        if queries.len() >= max_queries {
            break;
        }
    }

    // The original question always leads the set.
    if let Some(position) = queries.iter().position(|q| q == question) {
        if position != 0 {
            let original = queries.remove(position);
            queries.insert(0, original);
        }
    } else {
        queries.insert(0, question.to_string());
    }
    queries.truncate(max_queries.max(1));

    if queries.is_empty() {
        vec![question.to_string()]
    } else {
        queries
    }
}

/// Merge fan-out retrieval results, deduplicating by chunk id and keeping the lowest score.
///
/// The merged list is sorted by distance ascending (most similar first) and is no larger than
/// the concatenation of its inputs.
pub fn merge_results(result_sets: Vec<Vec<RetrievedChunk>>) -> Vec<RetrievedChunk> {
    let mut best: HashMap<String, RetrievedChunk> = HashMap::new();

    for chunk in result_sets.into_iter().flatten() {
        match best.get(&chunk.id) {
            Some(existing) if existing.score <= chunk.score => {}
            _ => {
                best.insert(chunk.id.clone(), chunk);
            }
        }
    }

    let mut merged: Vec<RetrievedChunk> = best.into_values().collect();
    merged.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompletionClient;
    use serde_json::Map;

    fn chunk(id: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            score,
            text: format!("text for {id}"),
            metadata: Map::new(),
        }
    }

    #[test]
    fn parse_expansion_keeps_original_first() {
        let raw = "What is the leave policy?\nHow many vacation days do I get?\nPTO rules";
        let queries = parse_expansion(raw, "What is the leave policy?", 3);
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "What is the leave policy?");
    }

    #[test]
    fn parse_expansion_inserts_missing_original() {
        let raw = "alternative one\nalternative two";
        let queries = parse_expansion(raw, "original question", 3);
        assert_eq!(queries[0], "original question");
        assert_eq!(queries.len(), 3);
    }

    #[test]
    fn parse_expansion_strips_bullets_and_dedupes() {
        let raw = "1. first phrasing\n- first phrasing\n2) second phrasing";
        let queries = parse_expansion(raw, "first phrasing", 3);
        assert_eq!(queries, vec!["first phrasing", "second phrasing"]);
    }

    #[test]
    fn parse_expansion_caps_length() {
        let raw = "q\na\nb\nc\nd";
        let queries = parse_expansion(raw, "q", 3);
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "q");
    }

    #[test]
    fn parse_expansion_handles_garbage() {
        let queries = parse_expansion("", "the question", 3);
        assert_eq!(queries, vec!["the question"]);
    }

    #[tokio::test]
    async fn expand_degrades_to_singleton_on_error() {
        let llm = ScriptedCompletionClient::new(vec![Err("provider down".into())]);
        let queries = expand(&llm, "the question", 3).await;
        assert_eq!(queries, vec!["the question"]);
    }

    #[tokio::test]
    async fn expand_skips_llm_when_max_is_one() {
        let llm = ScriptedCompletionClient::new(vec![]);
        let queries = expand(&llm, "the question", 1).await;
        assert_eq!(queries, vec!["the question"]);
        assert!(llm.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn merge_keeps_lowest_score_per_identity() {
        let merged = merge_results(vec![
            vec![chunk("X", 0.4), chunk("A", 0.2)],
            vec![chunk("X", 0.1), chunk("B", 0.3)],
        ]);

        assert_eq!(merged.len(), 3);
        let x = merged.iter().find(|c| c.id == "X").expect("X present once");
        assert!((x.score - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn merge_is_order_independent() {
        let forward = merge_results(vec![vec![chunk("X", 0.4)], vec![chunk("X", 0.1)]]);
        let reverse = merge_results(vec![vec![chunk("X", 0.1)], vec![chunk("X", 0.4)]]);
        assert!((forward[0].score - reverse[0].score).abs() < f32::EPSILON);
    }

    #[test]
    fn merge_sorts_ascending_by_distance() {
        let merged = merge_results(vec![vec![chunk("C", 0.9), chunk("A", 0.1), chunk("B", 0.5)]]);
        let ids: Vec<_> = merged.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn merge_bounds_hold() {
        let merged = merge_results(vec![
            vec![chunk("A", 0.1), chunk("B", 0.2)],
            vec![chunk("A", 0.3)],
        ]);
        // <= sum of inputs, >= largest single input
        assert!(merged.len() <= 3);
        assert!(merged.len() >= 2);
    }
}
