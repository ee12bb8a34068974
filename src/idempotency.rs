//! Durable record of processed documents, keyed by content fingerprint.
//!
//! The store answers one question for the worker: has this exact content been ingested before?
//! The fingerprint is a sha256 of the document text, so renamed or re-delivered files dedupe
//! correctly while edited files are treated as new documents. Concurrent workers racing on the
//! same fingerprint are resolved by the primary-key constraint, not by check-then-act.
//!
//! The pipeline counters live in the same database. Workers bump them as tasks settle and the
//! API server reads them back, so `/metrics` reflects every worker process sharing the store.

use crate::metrics::MetricsSnapshot;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Compute the content fingerprint for a document: lowercase hex sha256 of the raw text.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// SQLite-backed registry of processed document fingerprints.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    pool: SqlitePool,
}

impl ProcessedStore {
    /// Open (creating if necessary) the database at `path` and ensure the schema exists.
    pub async fn connect(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // One connection is enough: each worker processes sequentially (prefetch 1), and a
        // single pinned connection keeps in-memory databases intact across queries.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_documents (
                fingerprint     TEXT PRIMARY KEY,
                filename        TEXT NOT NULL,
                collection_name TEXT NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_stats (
                counter TEXT PRIMARY KEY,
                value   INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Whether a document with this fingerprint has already been ingested.
    pub async fn has_processed(&self, fingerprint: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM processed_documents WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Record a processed document. Returns `false` when another worker recorded the same
    /// fingerprint first, which callers treat as a duplicate.
    pub async fn record_processed(
        &self,
        fingerprint: &str,
        filename: &str,
        collection_name: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_documents (fingerprint, filename, collection_name)
            VALUES (?, ?, ?)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint)
        .bind(filename)
        .bind(collection_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count a successfully ingested document and the chunks written for it.
    pub async fn record_ingested(&self, chunk_count: u64) -> Result<(), sqlx::Error> {
        self.bump("documents_ingested", 1).await?;
        self.bump("chunks_stored", chunk_count as i64).await
    }

    /// Count a task skipped because its content fingerprint was already processed.
    pub async fn record_duplicate(&self) -> Result<(), sqlx::Error> {
        self.bump("duplicates_skipped", 1).await
    }

    /// Count a task that failed processing and was dropped.
    pub async fn record_failure(&self) -> Result<(), sqlx::Error> {
        self.bump("tasks_failed", 1).await
    }

    /// Read the current pipeline counters.
    pub async fn metrics_snapshot(&self) -> Result<MetricsSnapshot, sqlx::Error> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT counter, value FROM ingestion_stats")
                .fetch_all(&self.pool)
                .await?;
        Ok(MetricsSnapshot::from_rows(rows))
    }

    async fn bump(&self, counter: &str, delta: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_stats (counter, value)
            VALUES (?, ?)
            ON CONFLICT (counter) DO UPDATE SET value = value + excluded.value
            "#,
        )
        .bind(counter)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> ProcessedStore {
        ProcessedStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    #[test]
    fn fingerprint_is_content_addressed() {
        let a = fingerprint("the quarterly leave policy");
        let b = fingerprint("the quarterly leave policy");
        let c = fingerprint("the quarterly leave policy.");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn unseen_fingerprint_is_not_processed() {
        let store = memory_store().await;
        let seen = store.has_processed(&fingerprint("fresh")).await.expect("query");
        assert!(!seen);
    }

    #[tokio::test]
    async fn record_then_check_round_trips() {
        let store = memory_store().await;
        let print = fingerprint("policy text");

        let inserted = store
            .record_processed(&print, "policy.txt", "policy_collection")
            .await
            .expect("insert");
        assert!(inserted);
        assert!(store.has_processed(&print).await.expect("query"));
    }

    #[tokio::test]
    async fn duplicate_record_is_a_no_op() {
        let store = memory_store().await;
        let print = fingerprint("same content");

        assert!(
            store
                .record_processed(&print, "first.txt", "policy_collection")
                .await
                .expect("insert")
        );
        // Same content under a different name loses the race.
        assert!(
            !store
                .record_processed(&print, "renamed.txt", "policy_collection")
                .await
                .expect("insert")
        );
    }

    #[tokio::test]
    async fn counters_accumulate_across_records() {
        let store = memory_store().await;

        store.record_ingested(3).await.expect("ingested");
        store.record_ingested(2).await.expect("ingested");
        store.record_duplicate().await.expect("duplicate");
        store.record_failure().await.expect("failure");

        let snapshot = store.metrics_snapshot().await.expect("snapshot");
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_stored, 5);
        assert_eq!(snapshot.duplicates_skipped, 1);
        assert_eq!(snapshot.tasks_failed, 1);
    }

    #[tokio::test]
    async fn counters_start_at_zero() {
        let store = memory_store().await;
        let snapshot = store.metrics_snapshot().await.expect("snapshot");
        assert_eq!(snapshot.documents_ingested, 0);
        assert_eq!(snapshot.tasks_failed, 0);
    }
}
