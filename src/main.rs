//! API server binary: accepts ingestion requests and serves retrieval.

use anyhow::Context;
use knowledge_engine::{
    api, config, embedding, idempotency, llm, logging, queue, retrieval, service, vector,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let publisher = queue::TaskPublisher::connect(&config.amqp_url, &config.ingestion_queue)
        .await
        .context("failed to connect to the task broker")?;
    let orchestrator = retrieval::RetrievalOrchestrator::new(
        vector::VectorStoreClient::from_config()?,
        llm::get_completion_client(),
        embedding::get_embedding_client(),
    );
    let vector_client = vector::VectorStoreClient::from_config()?;
    vector_client
        .ensure_collection(&config.fallback_collection, config.embedding_dimension as u64)
        .await
        .context("failed to ensure the fallback collection")?;

    let store = idempotency::ProcessedStore::connect(&config.processed_db_path)
        .await
        .context("failed to open the processed-document store")?;
    let engine = service::EngineService::new(publisher, orchestrator, vector_client, store);
    let app = api::create_router(Arc::new(engine));

    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8100..=8199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8100-8199",
    ))
}
