use crate::entities::dataset::Dataset;
use crate::errors::PipelineError;
use crate::services::combiner::Combiner;
use crate::services::workers::run_indexed;
use crate::value_objects::artifact::{ArtifactKind, ModelArtifact};
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_MIN_BATCH: usize = 10_000;
pub const DEFAULT_RECLAIM_EVERY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub min_batch: usize,
    /// Batches between memory-reclamation points; 0 disables them.
    pub reclaim_every: usize,
    pub workers: usize,
    /// Reduce each batch result to raw coefficients so a batched fit is pooled across
    /// batches instead of refitted on the whole dataset.
    pub pool_batches: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_batch: DEFAULT_MIN_BATCH,
            reclaim_every: DEFAULT_RECLAIM_EVERY,
            workers: 1,
            pool_batches: false,
        }
    }
}

impl BatchPolicy {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Consecutive, non-overlapping row ranges covering `0..n_rows`.
pub fn plan_batches(n_rows: usize, batch_size: usize, min_batch: usize) -> Vec<Range<usize>> {
    if n_rows == 0 || n_rows < min_batch {
        return vec![0..n_rows];
    }
    let fifth = n_rows.div_ceil(5);
    let effective = batch_size.min(min_batch.max(fifth)).max(1);
    (0..n_rows)
        .step_by(effective)
        .map(|start| start..(start + effective).min(n_rows))
        .collect()
}

/// Fault-isolating batch runner: one failing batch never aborts the fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchExecutor {
    policy: BatchPolicy,
}

impl BatchExecutor {
    pub fn new(policy: BatchPolicy) -> Self {
        Self { policy }
    }

    /// Fits `fit_fn` batch by batch and merges the results as they arrive.
    ///
    /// Only raw coefficient results have a batch combination rule. When a batch comes back
    /// as any other kind the remaining batches are abandoned and `fit_fn` runs once on the
    /// whole dataset, so a pass-through artifact is never trained on a single batch.
    pub fn run<F>(&self, label: &str, dataset: &Dataset, fit_fn: F) -> Result<ModelArtifact, PipelineError>
    where
        F: Fn(&Dataset) -> Result<ModelArtifact, String> + Sync,
    {
        let plan = plan_batches(dataset.len(), self.policy.batch_size, self.policy.min_batch);
        let total = plan.len();
        debug!(label, rows = dataset.len(), batches = total, "batch plan");

        // Single-batch runs skip copying the dataset.
        if total == 1 {
            return self.run_whole(label, dataset, &fit_fn);
        }

        let mut combiner = Combiner::new(label);
        let mut last_error: Option<String> = None;
        let chunk = self.reclaim_chunk(total);

        for (chunk_idx, ranges) in plan.chunks(chunk).enumerate() {
            let offset = chunk_idx * chunk;
            let outcomes = run_indexed(ranges, self.policy.workers, |idx, range| {
                let batch = dataset.slice(range.clone());
                self.fit_one(label, offset + idx, total, &batch, &fit_fn, self.policy.pool_batches)
            });
            for outcome in outcomes {
                match outcome {
                    Ok(artifact) if artifact.kind() != ArtifactKind::RawCoefficient => {
                        debug!(
                            label,
                            kind = artifact.kind().label(),
                            rows = dataset.len(),
                            "no batch combination rule for this kind; fitting the whole dataset once"
                        );
                        metrics::counter!("poolcast.batch.whole_refits_total").increment(1);
                        return self.run_whole(label, dataset, &fit_fn);
                    }
                    Ok(artifact) => combiner.push(artifact)?,
                    Err(err) => last_error = Some(err),
                }
            }
            if self.policy.reclaim_every > 0 && offset + ranges.len() < total {
                debug!(
                    label,
                    completed = offset + ranges.len(),
                    total,
                    merged = combiner.received(),
                    "batch artifacts merged and released"
                );
            }
        }

        let succeeded = combiner.received();
        if succeeded == 0 {
            return Err(PipelineError::AllBatchesFailed {
                label: label.to_string(),
                batches: total,
                last_error,
            });
        }
        if succeeded < total {
            warn!(label, succeeded, total, "combined a partial set of batch results");
        }
        combiner.finish()
    }

    fn run_whole<F>(&self, label: &str, dataset: &Dataset, fit_fn: &F) -> Result<ModelArtifact, PipelineError>
    where
        F: Fn(&Dataset) -> Result<ModelArtifact, String> + Sync,
    {
        self.fit_one(label, 0, 1, dataset, fit_fn, false)
            .map_err(|err| PipelineError::AllBatchesFailed {
                label: label.to_string(),
                batches: 1,
                last_error: Some(err),
            })
    }

    fn reclaim_chunk(&self, total: usize) -> usize {
        if self.policy.reclaim_every == 0 {
            total.max(1)
        } else {
            self.policy.reclaim_every
        }
    }

    fn fit_one<F>(
        &self,
        label: &str,
        batch: usize,
        total: usize,
        data: &Dataset,
        fit_fn: &F,
        reduce_to_raw: bool,
    ) -> Result<ModelArtifact, String>
    where
        F: Fn(&Dataset) -> Result<ModelArtifact, String> + Sync,
    {
        let started = Instant::now();
        let outcome = fit_fn(data).and_then(|artifact| {
            if reduce_to_raw {
                artifact.into_raw()
            } else {
                Ok(artifact)
            }
        });
        metrics::histogram!("poolcast.batch.fit_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        match &outcome {
            Ok(_) => {
                metrics::counter!("poolcast.batch.calls_total", "result" => "ok").increment(1);
            }
            Err(err) => {
                metrics::counter!("poolcast.batch.calls_total", "result" => "error").increment(1);
                warn!(
                    label,
                    batch = batch + 1,
                    total,
                    rows = data.len(),
                    error = %err,
                    "batch fit failed; continuing with remaining batches"
                );
            }
        }
        outcome
    }
}
