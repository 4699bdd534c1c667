use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BatchConfig;
use crate::lifecycle::{LifecycleError, LifecycleManager, SubmitMode};
use crate::metrics;
use crate::record::DoiRequest;

use super::{BatchJob, BatchOutcome, RecordOutcome};

/// Applies the lifecycle manager to every record of a batch.
pub struct BatchProcessor {
    manager: Arc<LifecycleManager>,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(manager: Arc<LifecycleManager>, config: BatchConfig) -> Self {
        Self { manager, config }
    }

    /// Process every record with `mode`.
    ///
    /// Records are independent: a failure never affects another record.
    /// Keys that appear more than once are all rejected without being
    /// attempted.
    pub async fn process(&self, records: Vec<DoiRequest>, mode: SubmitMode, actor: &str) -> BatchJob {
        self.run(records, mode, actor, false).await
    }

    /// Check every record against `mode` without submitting or recording
    /// anything. Accepted outcomes carry the state the record would reach.
    pub async fn dry_run(&self, records: Vec<DoiRequest>, mode: SubmitMode, actor: &str) -> BatchJob {
        self.run(records, mode, actor, true).await
    }

    async fn run(
        &self,
        records: Vec<DoiRequest>,
        mode: SubmitMode,
        actor: &str,
        dry_run: bool,
    ) -> BatchJob {
        let submitted_at = Utc::now();
        let total = records.len();

        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for record in &records {
            *occurrences.entry(record.key.clone()).or_default() += 1;
        }

        let mut outcomes: Vec<Option<BatchOutcome>> = vec![None; total];
        let mut to_run = Vec::with_capacity(total);
        for (index, record) in records.into_iter().enumerate() {
            if occurrences.get(&record.key).copied().unwrap_or(0) > 1 {
                debug!(key = %record.key, index, "Duplicate key in batch");
                let err = LifecycleError::ConcurrentModification {
                    key: record.key.clone(),
                    detail: "key appears more than once in the batch".to_string(),
                };
                outcomes[index] = Some(BatchOutcome {
                    index,
                    outcome: RecordOutcome::rejected(&err),
                    key: record.key,
                });
            } else {
                to_run.push((index, record));
            }
        }

        // Fan out with a concurrency limit
        let manager = &self.manager;
        let results: Vec<BatchOutcome> = stream::iter(to_run)
            .map(|(index, record)| async move {
                let key = record.key.clone();
                let result = if dry_run {
                    manager.dry_run(record, mode, actor).await
                } else {
                    manager.submit(record, mode, actor).await
                };
                let outcome = match result {
                    Ok(record) => RecordOutcome::accepted(&record),
                    Err(e) => {
                        debug!(key = %key, index, error = %e, "Batch record rejected");
                        RecordOutcome::rejected(&e)
                    }
                };
                BatchOutcome {
                    index,
                    key,
                    outcome,
                }
            })
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;

        for result in results {
            let index = result.index;
            outcomes[index] = Some(result);
        }

        let job = BatchJob::new(
            mode,
            dry_run,
            submitted_at,
            outcomes.into_iter().flatten().collect(),
        );

        if !dry_run {
            metrics::BATCH_RECORDS
                .with_label_values(&[mode.as_str(), "accepted"])
                .inc_by(job.accepted as u64);
            metrics::BATCH_RECORDS
                .with_label_values(&[mode.as_str(), "rejected"])
                .inc_by(job.rejected as u64);
        }

        info!(
            batch_id = %job.id,
            mode = mode.as_str(),
            dry_run,
            total,
            accepted = job.accepted,
            rejected = job.rejected,
            "Batch processed"
        );

        job
    }
}
