#![deny(missing_docs)]

//! Core library for the knowledge engine: asynchronous document ingestion and
//! schema-aware retrieval over a vector store.

/// HTTP routing and REST handlers.
pub mod api;
/// Collection routing for documents and queries.
pub mod classify;
/// Environment-driven configuration management.
pub mod config;
/// Document loading and chunking.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Query expansion and result merging.
pub mod expansion;
/// Schema-aware filter and metadata extraction.
pub mod extraction;
/// Durable processed-document registry.
pub mod idempotency;
/// Completion client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counter reporting.
pub mod metrics;
/// Prompt assembly for LLM-dependent steps.
pub mod prompts;
/// AMQP task publishing and consumption.
pub mod queue;
/// Search and ask orchestration.
pub mod retrieval;
/// Collection schema registry and validation.
pub mod schema;
/// Service facade behind the HTTP surface.
pub mod service;
/// Vector store integration.
pub mod vector;
/// The ingestion worker pipeline.
pub mod worker;
