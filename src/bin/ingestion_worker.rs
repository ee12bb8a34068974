//! Ingestion worker binary: consumes queued tasks and runs the processing pipeline.

use anyhow::Context;
use knowledge_engine::{config, embedding, idempotency, llm, logging, queue, vector, worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let store = idempotency::ProcessedStore::connect(&config.processed_db_path)
        .await
        .context("failed to open the idempotency store")?;
    let engine_worker = worker::IngestionWorker::new(
        store,
        vector::VectorStoreClient::from_config()?,
        llm::get_completion_client(),
        embedding::get_embedding_client(),
    );

    let mut consumer = queue::IngestionConsumer::connect(&config.amqp_url, &config.ingestion_queue)
        .await
        .context("failed to connect to the task broker")?;

    tracing::info!(queue = %config.ingestion_queue, "Worker consuming ingestion tasks");
    consumer
        .run(|task| engine_worker.handle(task))
        .await
        .context("consumer stream terminated")?;
    Ok(())
}
