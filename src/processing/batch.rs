//! Batch orchestration: orphan recovery, work-set selection, bounded concurrent runs.

use crate::metrics::PipelineMetrics;
use crate::processing::pipeline::{Admission, FilePipeline};
use crate::processing::types::{BatchOptions, BatchSummary, FileResult, WorkItem};
use crate::store::{FileRecord, FileStatus, StoreError};
use futures_util::{StreamExt, stream};
use std::collections::HashSet;
use std::sync::Arc;

/// Failure messages kept in a batch's `error_summary`.
const MAX_SUMMARY_ERRORS: usize = 10;

/// Work items of one batch, fixed before the batch record is created.
#[derive(Debug)]
pub struct WorkSet {
    items: Vec<WorkItem>,
    resumed: u32,
}

impl WorkSet {
    /// Number of files the batch will account for.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is left to do.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records picked up from earlier runs.
    pub fn resumed(&self) -> u32 {
        self.resumed
    }
}

/// Runs a work set through the file pipeline over a bounded pool and records the batch.
pub struct BatchOrchestrator {
    pipeline: Arc<FilePipeline>,
    concurrency: usize,
    metrics: Arc<PipelineMetrics>,
}

#[derive(Default)]
struct Tally {
    successful: u32,
    failed: u32,
    skipped: u32,
    errors: Vec<String>,
}

impl Tally {
    fn record(&mut self, result: &FileResult) {
        if result.is_success() {
            self.successful += 1;
        } else if result.is_skipped() {
            self.skipped += 1;
        } else {
            self.failed += 1;
            if self.errors.len() < MAX_SUMMARY_ERRORS {
                self.errors.push(format!(
                    "{}: {}",
                    result.locator,
                    result.error().unwrap_or("unknown error")
                ));
            }
        }
    }

    fn summary(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("\n"))
    }
}

impl BatchOrchestrator {
    /// Create an orchestrator running at most `concurrency` files at once (minimum one).
    pub fn new(
        pipeline: Arc<FilePipeline>,
        concurrency: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    /// Process `locators`, plus resumable records from earlier runs when `options.resume`.
    ///
    /// Results are returned in work-set order: supplied locators first, then resumed records.
    /// Only store unavailability is returned as an error; the batch is then closed as
    /// `partial` when the store still accepts the write.
    pub async fn run_batch(
        &self,
        locators: Vec<String>,
        options: BatchOptions,
    ) -> Result<BatchSummary, StoreError> {
        let work = self.select_work(locators, options)?;
        self.run_work_set(work, options).await
    }

    /// Reclaim orphaned records and fix the work set of the next run.
    ///
    /// This is the only step that must not overlap with other pipelines: it resets every
    /// in-flight record, so a file processed concurrently would be reclaimed mid-run.
    pub fn select_work(
        &self,
        locators: Vec<String>,
        options: BatchOptions,
    ) -> Result<WorkSet, StoreError> {
        self.pipeline.store().reset_orphaned_processing()?;
        let records = if options.resume {
            self.resumable_records(&locators)?
        } else {
            Vec::new()
        };
        let resumed = records.len() as u32;
        let items = locators
            .into_iter()
            .map(|locator| WorkItem::Fresh { locator })
            .chain(records.into_iter().map(|record| WorkItem::Resume { record }))
            .collect();
        Ok(WorkSet { items, resumed })
    }

    /// Record a batch over `work` and run it through the pipeline.
    pub async fn run_work_set(
        &self,
        work: WorkSet,
        options: BatchOptions,
    ) -> Result<BatchSummary, StoreError> {
        let store = self.pipeline.store();
        let WorkSet { items, resumed } = work;
        let total_files = items.len() as u32;
        let batch = store.create_batch(total_files)?;
        tracing::info!(
            batch_id = %batch.id,
            total_files,
            resumed,
            concurrency = self.concurrency,
            skip_duplicates = options.skip_duplicates,
            "Batch started"
        );

        let pipeline = self.pipeline.as_ref();
        let skip_duplicates = options.skip_duplicates;
        let mut runs = stream::iter(items)
            .map(|item| pipeline.fetch(item))
            .buffered(self.concurrency)
            .map(|fetched| {
                let admission = pipeline.admit(fetched, skip_duplicates);
                async move {
                    match admission {
                        Ok(Admission::Done(result)) => Ok(result),
                        Ok(Admission::Run(claimed)) => pipeline.execute(claimed).await,
                        Err(err) => Err(err),
                    }
                }
            })
            .buffered(self.concurrency);

        let mut tally = Tally::default();
        let mut results = Vec::with_capacity(total_files as usize);
        while let Some(result) = runs.next().await {
            match result {
                Ok(result) => {
                    tally.record(&result);
                    results.push(result);
                }
                Err(err) => {
                    tracing::error!(batch_id = %batch.id, error = %err, "Batch aborted");
                    if let Err(close_err) = store.abort_batch(
                        &batch.id,
                        tally.successful,
                        tally.failed,
                        err.to_string(),
                    ) {
                        tracing::error!(
                            batch_id = %batch.id,
                            error = %close_err,
                            "Could not mark aborted batch"
                        );
                    }
                    return Err(err);
                }
            }
        }
        let record = store.finish_batch(&batch.id, tally.successful, tally.failed, tally.summary())?;
        self.metrics.record_batch();
        tracing::info!(
            batch_id = %record.id,
            successful = tally.successful,
            failed = tally.failed,
            skipped = tally.skipped,
            status = %record.status,
            "Batch finished"
        );

        Ok(BatchSummary {
            batch_id: record.id,
            total_files,
            successful: tally.successful,
            failed: tally.failed,
            skipped: tally.skipped,
            resumed,
            status: record.status,
            results,
        })
    }

    /// `pending` and retryable `failed` records not covered by the supplied locators.
    fn resumable_records(&self, locators: &[String]) -> Result<Vec<FileRecord>, StoreError> {
        let store = self.pipeline.store();
        let max_retries = store.max_retries();
        let supplied: HashSet<&str> = locators.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();

        let mut candidates = store.list_by_status(FileStatus::Pending, None)?;
        candidates.extend(store.list_failed(max_retries)?);

        Ok(candidates
            .into_iter()
            .filter(|record| record.is_resumable(max_retries))
            .filter(|record| !supplied.contains(record.source_path.as_str()))
            .filter(|record| seen.insert(record.id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::types::FileOutcome;
    use crate::store::FailureKind;

    fn failed(locator: &str) -> FileResult {
        FileResult {
            locator: locator.to_string(),
            outcome: FileOutcome::Failed {
                file_id: None,
                content_hash: None,
                error_kind: FailureKind::Download,
                error: "missing".into(),
            },
        }
    }

    #[test]
    fn summary_keeps_first_ten_failures() {
        let mut tally = Tally::default();
        for index in 0..12 {
            tally.record(&failed(&format!("f{index}.pdf")));
        }
        assert_eq!(tally.failed, 12);
        let summary = tally.summary().unwrap();
        assert_eq!(summary.lines().count(), MAX_SUMMARY_ERRORS);
        assert!(summary.starts_with("f0.pdf: missing"));
    }

    #[test]
    fn clean_tally_has_no_summary() {
        assert_eq!(Tally::default().summary(), None);
    }
}
