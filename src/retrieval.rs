//! The retrieval orchestrator: routing, filtering, search, and grounded answering.
//!
//! Search runs routing and filter extraction before a single retrieval and returns the scored
//! snippets as the store ranked them. Answering additionally expands the question, fans out
//! over the expanded queries concurrently, merges, and threshold-filters before grounding the
//! completion. Only the vector store and the embedder can fail a request; every LLM-dependent
//! step degrades to a safe default so a flaky model narrows the retrieval instead of breaking
//! it.

use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;

use crate::classify;
use crate::config::get_config;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::expansion::{expand, merge_results};
use crate::extraction::extract_query_filter;
use crate::llm::{CompletionClient, CompletionError};
use crate::prompts::{self, REFUSAL_ANSWER};
use crate::schema::schema_for;
use crate::vector::{RetrievedChunk, VectorStoreClient, VectorStoreError};

/// Errors raised by search and ask orchestration.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A vector store operation failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Query embeddings could not be generated.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// The grounded-answer completion failed after context was retrieved.
    #[error("Failed to generate answer: {0}")]
    Answer(#[from] CompletionError),
}

/// Outcome of a routed, filtered search.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Collection the query was routed to.
    pub collection: String,
    /// Store filter applied to the retrieval, when one was extracted.
    pub filter: Option<Value>,
    /// Scored chunks sorted by distance ascending, as ranked by the store.
    pub results: Vec<RetrievedChunk>,
}

/// Outcome of a grounded question-answer round.
#[derive(Debug)]
pub struct AskOutcome {
    /// The generated answer, or the fixed refusal when no context survived.
    pub answer: String,
    /// Collection the question was routed to.
    pub collection: String,
    /// Chunks the answer was grounded on.
    pub sources: Vec<RetrievedChunk>,
}

/// Executes retrieval requests against the vector store.
pub struct RetrievalOrchestrator {
    vector: VectorStoreClient,
    llm: Box<dyn CompletionClient>,
    embedder: Box<dyn EmbeddingClient>,
}

impl RetrievalOrchestrator {
    /// Assemble an orchestrator from its dependencies.
    pub fn new(
        vector: VectorStoreClient,
        llm: Box<dyn CompletionClient>,
        embedder: Box<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            vector,
            llm,
            embedder,
        }
    }

    /// Route a question to a collection and extract a schema-validated filter for it.
    ///
    /// The filter is `None` when the collection has no schema or nothing usable could be
    /// extracted; the collection may be absent from the store (the fallback, typically).
    pub async fn route_and_filter(
        &self,
        question: &str,
        existing: &[String],
    ) -> (String, Option<Value>) {
        let config = get_config();
        let classification =
            classify::classify_query(self.llm.as_ref(), question, existing).await;
        let collection = classification.into_collection_name(&config.fallback_collection);
        let filter = extract_query_filter(self.llm.as_ref(), question, &collection).await;
        (collection, filter)
    }

    /// Route a question, extract a filter, and run one retrieval against the store.
    ///
    /// Results come back exactly as the store ranked them; expansion and threshold filtering
    /// belong to the answering path.
    pub async fn search(
        &self,
        question: &str,
        k: Option<usize>,
    ) -> Result<SearchOutcome, RetrievalError> {
        let config = get_config();
        let k = k.unwrap_or(config.search_default_k).max(1);

        let existing = self.vector.list_collections().await?;
        let (collection, filter) = self.route_and_filter(question, &existing).await;

        if !existing.iter().any(|name| name == &collection) {
            tracing::info!(collection = %collection, "Routed collection does not exist; nothing to search");
            return Ok(SearchOutcome {
                collection,
                filter: None,
                results: Vec::new(),
            });
        }

        let mut embeddings = self
            .embedder
            .generate_embeddings(vec![question.to_string()])
            .await?;
        let embedding = embeddings.pop().unwrap_or_default();
        let results = self
            .vector
            .query(&collection, embedding, k, filter.clone())
            .await?;

        Ok(SearchOutcome {
            collection,
            filter,
            results,
        })
    }

    /// Answer a question grounded in retrieved context.
    ///
    /// The question is expanded, the expanded queries are retrieved concurrently, and the
    /// merged results are filtered by the similarity threshold. When no chunk survives, the
    /// fixed refusal is returned without calling the LLM: an empty context must never produce
    /// a hallucinated answer.
    pub async fn ask(&self, question: &str) -> Result<AskOutcome, RetrievalError> {
        let config = get_config();
        let k = config.search_default_k.max(1);

        let existing = self.vector.list_collections().await?;
        let (collection, filter) = self.route_and_filter(question, &existing).await;

        let results = if existing.iter().any(|name| name == &collection) {
            self.expanded_retrieve(question, &collection, filter, k)
                .await?
        } else {
            tracing::info!(collection = %collection, "Routed collection does not exist; nothing to retrieve");
            Vec::new()
        };

        if results.is_empty() {
            tracing::info!(collection = %collection, "No context above threshold; refusing");
            return Ok(AskOutcome {
                answer: REFUSAL_ANSWER.to_string(),
                collection,
                sources: Vec::new(),
            });
        }

        let context = results
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let hint = schema_for(&collection)
            .map(|schema| schema.answer_hint())
            .unwrap_or_default();

        let prompt = prompts::grounded_answer(&hint, &context, question);
        let answer = self.llm.complete(&prompt).await?;

        Ok(AskOutcome {
            answer,
            collection,
            sources: results,
        })
    }

    /// Expand the question, retrieve every expanded query concurrently, and merge the result
    /// sets, keeping only chunks at or below the similarity threshold.
    async fn expanded_retrieve(
        &self,
        question: &str,
        collection: &str,
        filter: Option<Value>,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let config = get_config();
        let queries = expand(self.llm.as_ref(), question, config.query_expansion_max).await;
        tracing::debug!(
            collection = %collection,
            queries = queries.len(),
            filtered = filter.is_some(),
            "Running retrieval fan-out"
        );

        let embeddings = self.embedder.generate_embeddings(queries).await?;
        let searches = embeddings
            .into_iter()
            .map(|embedding| self.vector.query(collection, embedding, k, filter.clone()));

        let mut result_sets = Vec::new();
        let mut last_error = None;
        for outcome in join_all(searches).await {
            match outcome {
                Ok(results) => result_sets.push(results),
                Err(error) => {
                    tracing::warn!(error = %error, "One fan-out query failed");
                    last_error = Some(error);
                }
            }
        }
        if result_sets.is_empty()
            && let Some(error) = last_error
        {
            return Err(error.into());
        }

        let mut results = merge_results(result_sets);
        results.retain(|chunk| chunk.score <= config.similarity_threshold);
        results.truncate(k);
        Ok(results)
    }
}
