//! Service facade shared by the HTTP surface.
//!
//! Handlers program against [`EngineApi`] so router tests can stub the whole engine. The
//! production implementation wires the task publisher, the retrieval orchestrator, the vector
//! store client, and the shared processed-document store together and owns the request-level
//! timeout around orchestration.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::get_config;
use crate::idempotency::ProcessedStore;
use crate::metrics::MetricsSnapshot;
use crate::queue::{QueueError, TaskMessage, TaskPublisher};
use crate::retrieval::{AskOutcome, RetrievalError, RetrievalOrchestrator, SearchOutcome};
use crate::vector::{VectorStoreClient, VectorStoreError};

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The task broker rejected or could not accept a publish.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// A retrieval operation failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// A vector store operation failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// The pipeline counters could not be read.
    #[error("Failed to read pipeline counters: {0}")]
    Metrics(#[from] sqlx::Error),
    /// The request exceeded the configured orchestration deadline.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
}

impl ServiceError {
    /// Whether the caller should retry later (the broker being down is transient).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Queue(QueueError::BrokerUnavailable(_)))
    }
}

/// Operations exposed to the HTTP surface.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Queue a document for asynchronous ingestion; returns the assigned task id.
    async fn enqueue_ingestion(
        &self,
        file_path: String,
        filename: String,
    ) -> Result<String, ServiceError>;

    /// Routed, filtered retrieval.
    async fn search(&self, question: &str, k: Option<usize>)
    -> Result<SearchOutcome, ServiceError>;

    /// Grounded question answering.
    async fn ask(&self, question: &str) -> Result<AskOutcome, ServiceError>;

    /// Names of all collections in the vector store.
    async fn list_collections(&self) -> Result<Vec<String>, ServiceError>;

    /// Delete a collection and everything in it.
    async fn delete_collection(&self, name: &str) -> Result<(), ServiceError>;

    /// Snapshot of the pipeline counters persisted by the workers.
    async fn metrics_snapshot(&self) -> Result<MetricsSnapshot, ServiceError>;
}

/// Production [`EngineApi`] implementation.
pub struct EngineService {
    publisher: TaskPublisher,
    orchestrator: RetrievalOrchestrator,
    vector: VectorStoreClient,
    store: ProcessedStore,
}

impl EngineService {
    /// Assemble the service from its collaborators.
    pub fn new(
        publisher: TaskPublisher,
        orchestrator: RetrievalOrchestrator,
        vector: VectorStoreClient,
        store: ProcessedStore,
    ) -> Self {
        Self {
            publisher,
            orchestrator,
            vector,
            store,
        }
    }

    fn request_deadline(&self) -> (Duration, u64) {
        let secs = get_config().request_timeout_secs;
        (Duration::from_secs(secs), secs)
    }
}

#[async_trait]
impl EngineApi for EngineService {
    async fn enqueue_ingestion(
        &self,
        file_path: String,
        filename: String,
    ) -> Result<String, ServiceError> {
        let task = TaskMessage {
            task_id: Uuid::new_v4().to_string(),
            file_path,
            filename,
        };
        self.publisher.publish(&task).await?;
        Ok(task.task_id)
    }

    async fn search(
        &self,
        question: &str,
        k: Option<usize>,
    ) -> Result<SearchOutcome, ServiceError> {
        let (deadline, secs) = self.request_deadline();
        let outcome = tokio::time::timeout(deadline, self.orchestrator.search(question, k))
            .await
            .map_err(|_| ServiceError::Timeout(secs))??;
        Ok(outcome)
    }

    async fn ask(&self, question: &str) -> Result<AskOutcome, ServiceError> {
        let (deadline, secs) = self.request_deadline();
        let outcome = tokio::time::timeout(deadline, self.orchestrator.ask(question))
            .await
            .map_err(|_| ServiceError::Timeout(secs))??;
        Ok(outcome)
    }

    async fn list_collections(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.vector.list_collections().await?)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), ServiceError> {
        Ok(self.vector.delete_collection(name).await?)
    }

    async fn metrics_snapshot(&self) -> Result<MetricsSnapshot, ServiceError> {
        Ok(self.store.metrics_snapshot().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_unavailable_is_retryable() {
        let error = ServiceError::Queue(QueueError::BrokerUnavailable("down".into()));
        assert!(error.is_retryable());

        let error = ServiceError::Timeout(120);
        assert!(!error.is_retryable());
    }
}
