use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    files_succeeded: AtomicU64,
    files_failed: AtomicU64,
    files_skipped: AtomicU64,
    pages_embedded: AtomicU64,
    batches_run: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file that completed with `pages` embedded pages.
    pub fn record_success(&self, pages: u64) {
        self.files_succeeded.fetch_add(1, Ordering::Relaxed);
        self.pages_embedded.fetch_add(pages, Ordering::Relaxed);
    }

    /// Record a file that ended in `failed`.
    pub fn record_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a file skipped as a duplicate.
    pub fn record_skip(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished batch run.
    pub fn record_batch(&self) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_succeeded: self.files_succeeded.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            pages_embedded: self.pages_embedded.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Files that reached `completed`.
    pub files_succeeded: u64,
    /// Files that ended an attempt in `failed`.
    pub files_failed: u64,
    /// Files skipped as duplicates.
    pub files_skipped: u64,
    /// Pages embedded across all completed files.
    pub pages_embedded: u64,
    /// Batch runs finished.
    pub batches_run: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_and_pages() {
        let metrics = PipelineMetrics::new();
        metrics.record_success(2);
        metrics.record_success(3);
        metrics.record_failure();
        metrics.record_skip();
        metrics.record_batch();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_succeeded, 2);
        assert_eq!(snapshot.pages_embedded, 5);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.files_skipped, 1);
        assert_eq!(snapshot.batches_run, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
