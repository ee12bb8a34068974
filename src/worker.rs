//! The ingestion worker: one queued task in, classified and embedded chunks out.
//!
//! Each task runs the full pipeline: load, fingerprint, dedup check, classify, extract
//! metadata, chunk, embed, upsert, record. The error type distinguishes the one failure that
//! warrants redelivery (the idempotency store being unreachable before any work happened) from
//! processing failures, which are dropped so a poison document cannot loop forever.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::classify::{self, SAMPLE_WORDS};
use crate::config::get_config;
use crate::document::{self, DEFAULT_CHUNK_SIZE, DocumentError};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::extraction::extract_document_metadata;
use crate::idempotency::{ProcessedStore, fingerprint};
use crate::llm::CompletionClient;
use crate::queue::{Disposition, TaskMessage};
use crate::schema::schema_for;
use crate::vector::{
    ChunkPoint, VectorStoreClient, VectorStoreError, build_chunk_metadata, stable_chunk_id,
};

/// Errors raised while processing one ingestion task.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The document could not be loaded from shared storage.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// The idempotency store could not be queried before processing began.
    #[error("Idempotency store unavailable: {0}")]
    DedupCheck(sqlx::Error),
    /// The processed-document record could not be written after the vector write.
    #[error("Failed to record processed document: {0}")]
    Record(sqlx::Error),
    /// A vector store operation failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Embedding generation failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
}

impl WorkerError {
    /// Map a processing failure to its queue settlement.
    ///
    /// Only a failed dedup check requeues: no work has happened yet and the task is intact.
    /// Everything later is dropped, because redelivery would replay the same failure.
    pub fn disposition(&self) -> Disposition {
        match self {
            WorkerError::DedupCheck(_) => Disposition::NackRequeue,
            _ => Disposition::NackDrop,
        }
    }
}

/// Result of successfully settling one ingestion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The document was chunked and stored in the named collection.
    Stored {
        /// Collection the chunks were routed to.
        collection: String,
        /// Number of chunks written.
        chunks: usize,
    },
    /// The document's content fingerprint was already processed; nothing was written.
    Duplicate,
}

/// Executes the ingestion pipeline for queued tasks.
pub struct IngestionWorker {
    store: ProcessedStore,
    vector: VectorStoreClient,
    llm: Box<dyn CompletionClient>,
    embedder: Box<dyn EmbeddingClient>,
}

impl IngestionWorker {
    /// Assemble a worker from its dependencies.
    pub fn new(
        store: ProcessedStore,
        vector: VectorStoreClient,
        llm: Box<dyn CompletionClient>,
        embedder: Box<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            store,
            vector,
            llm,
            embedder,
        }
    }

    /// Process one task end to end.
    pub async fn process(&self, task: &TaskMessage) -> Result<TaskOutcome, WorkerError> {
        let config = get_config();
        let text = document::load_text(&task.file_path).await?;
        let print = fingerprint(&text);

        if self
            .store
            .has_processed(&print)
            .await
            .map_err(WorkerError::DedupCheck)?
        {
            tracing::info!(task_id = %task.task_id, filename = %task.filename, "Skipping duplicate content");
            remove_source_file(&task.file_path).await;
            self.count(self.store.record_duplicate().await);
            return Ok(TaskOutcome::Duplicate);
        }

        let sample = classify::bounded_sample(&text, SAMPLE_WORDS);
        let existing = self.vector.list_collections().await?;
        let classification = classify::classify_document(self.llm.as_ref(), &sample, &existing).await;
        let collection = classification.into_collection_name(&config.fallback_collection);

        self.vector
            .ensure_collection(&collection, config.embedding_dimension as u64)
            .await?;

        let fields = match schema_for(&collection) {
            Some(schema) => extract_document_metadata(self.llm.as_ref(), &sample, schema).await,
            None => BTreeMap::new(),
        };

        let chunk_size = config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunks = document::chunk_text(&text, chunk_size, config.chunk_overlap);
        let stored = self
            .store_chunks(&collection, &print, chunks, &fields)
            .await?;

        // The record is written after the vector upsert; stable point ids make a replay of the
        // window between the two writes overwrite in place rather than duplicate.
        let inserted = self
            .store
            .record_processed(&print, &task.filename, &collection)
            .await
            .map_err(WorkerError::Record)?;
        remove_source_file(&task.file_path).await;
        if !inserted {
            tracing::info!(task_id = %task.task_id, "Lost fingerprint race to a concurrent worker");
            self.count(self.store.record_duplicate().await);
            return Ok(TaskOutcome::Duplicate);
        }

        self.count(self.store.record_ingested(stored as u64).await);
        tracing::info!(
            task_id = %task.task_id,
            filename = %task.filename,
            collection = %collection,
            chunks = stored,
            "Document ingested"
        );
        Ok(TaskOutcome::Stored { collection, chunks: stored })
    }

    async fn store_chunks(
        &self,
        collection: &str,
        print: &str,
        chunks: Vec<String>,
        fields: &BTreeMap<String, crate::schema::FieldValue>,
    ) -> Result<usize, WorkerError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embedder.generate_embeddings(chunks.clone()).await?;

        let points: Vec<ChunkPoint> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, vector))| ChunkPoint {
                id: stable_chunk_id(print, index),
                vector,
                metadata: build_chunk_metadata(collection, fields),
                text,
            })
            .collect();

        let stored = self.vector.upsert_chunks(collection, points).await?;
        Ok(stored)
    }

    /// Count a settled task; a counter write failure never fails the task itself.
    fn count(&self, result: Result<(), sqlx::Error>) {
        if let Err(error) = result {
            tracing::warn!(error = %error, "Failed to update pipeline counters");
        }
    }

    /// Run one task and translate the outcome into a queue settlement.
    pub async fn handle(&self, task: TaskMessage) -> Disposition {
        match self.process(&task).await {
            Ok(_) => Disposition::Ack,
            Err(error) => {
                let disposition = error.disposition();
                if disposition == Disposition::NackDrop {
                    self.count(self.store.record_failure().await);
                }
                tracing::error!(
                    task_id = %task.task_id,
                    filename = %task.filename,
                    error = %error,
                    ?disposition,
                    "Task processing failed"
                );
                disposition
            }
        }
    }
}

/// Remove a settled task's source file from shared storage.
///
/// Failures are logged and ignored: the chunks are stored and the fingerprint recorded, so a
/// leftover file only costs disk space.
async fn remove_source_file(path: &str) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        tracing::warn!(path, error = %error, "Failed to remove source file");
    }
}
