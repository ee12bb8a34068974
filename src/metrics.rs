//! Snapshot of the pipeline counters persisted by the ingestion workers.
//!
//! The workers and the API server are separate processes, so the counters live next to the
//! processed-document records in SQLite rather than in process memory. The store persists
//! `(counter, value)` rows; this module turns them into the reported snapshot.

use serde::Serialize;

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents ingested.
    pub documents_ingested: u64,
    /// Total chunk count stored across all ingested documents.
    pub chunks_stored: u64,
    /// Number of tasks skipped as byte-identical duplicates.
    pub duplicates_skipped: u64,
    /// Number of tasks dropped after a processing failure.
    pub tasks_failed: u64,
}

impl MetricsSnapshot {
    /// Assemble a snapshot from persisted `(counter, value)` rows.
    ///
    /// Missing counters read as zero; unknown counter names are ignored so older rows never
    /// break reporting.
    pub fn from_rows(rows: Vec<(String, i64)>) -> Self {
        let mut snapshot = Self::default();
        for (counter, value) in rows {
            let value = value.max(0) as u64;
            match counter.as_str() {
                "documents_ingested" => snapshot.documents_ingested = value,
                "chunks_stored" => snapshot.chunks_stored = value,
                "duplicates_skipped" => snapshot.duplicates_skipped = value,
                "tasks_failed" => snapshot.tasks_failed = value,
                other => tracing::debug!(counter = other, "Ignoring unknown counter row"),
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_maps_counter_rows() {
        let snapshot = MetricsSnapshot::from_rows(vec![
            ("documents_ingested".into(), 3),
            ("chunks_stored".into(), 12),
            ("duplicates_skipped".into(), 1),
        ]);

        assert_eq!(snapshot.documents_ingested, 3);
        assert_eq!(snapshot.chunks_stored, 12);
        assert_eq!(snapshot.duplicates_skipped, 1);
        assert_eq!(snapshot.tasks_failed, 0);
    }

    #[test]
    fn snapshot_ignores_unknown_counters() {
        let snapshot = MetricsSnapshot::from_rows(vec![
            ("documents_ingested".into(), 2),
            ("queue_depth".into(), 99),
        ]);

        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_stored, 0);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let snapshot = MetricsSnapshot::from_rows(Vec::new());
        assert_eq!(snapshot.documents_ingested, 0);
        assert_eq!(snapshot.chunks_stored, 0);
        assert_eq!(snapshot.duplicates_skipped, 0);
        assert_eq!(snapshot.tasks_failed, 0);
    }
}
