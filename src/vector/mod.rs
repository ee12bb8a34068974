//! Vector store integration.
//!
//! The engine talks to the store over its HTTP API and treats the reported score as a
//! distance: lower means more similar. Everything above the configured similarity threshold
//! is discarded by the retrieval orchestrator.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::VectorStoreClient;
pub use filters::build_metadata_filter;
pub use payload::{build_chunk_metadata, stable_chunk_id};
pub use types::{ChunkPoint, RetrievedChunk, VectorStoreError};
