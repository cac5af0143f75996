use crate::errors::PipelineError;
use crate::value_objects::artifact::{CoefficientTable, ModelArtifact};
use tracing::{debug, warn};

/// Merges successful batch artifacts into one, dispatching on the kind of the first.
///
/// Raw coefficient batches are pooled with sample-size weights (fixed-effect pooling);
/// every other kind is fitted once on its full slice, so the first batch passes through.
pub fn combine(label: &str, artifacts: Vec<ModelArtifact>) -> Result<ModelArtifact, PipelineError> {
    let mut combiner = Combiner::new(label);
    for artifact in artifacts {
        combiner.push(artifact)?;
    }
    combiner.finish()
}

enum State {
    Empty,
    One(ModelArtifact),
    Pooling {
        first: CoefficientTable,
        pool: FixedEffectPool,
    },
    Kept(ModelArtifact),
}

/// Folds batch artifacts in as they arrive; only the running pooled sums are retained.
pub struct Combiner<'a> {
    label: &'a str,
    state: State,
    received: usize,
}

impl<'a> Combiner<'a> {
    pub fn new(label: &'a str) -> Self {
        Self {
            label,
            state: State::Empty,
            received: 0,
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn push(&mut self, artifact: ModelArtifact) -> Result<(), PipelineError> {
        self.received += 1;
        let label = self.label;
        self.state = match std::mem::replace(&mut self.state, State::Empty) {
            State::Empty => State::One(artifact),
            State::One(ModelArtifact::RawCoefficient(first)) => match artifact {
                ModelArtifact::RawCoefficient(table) => {
                    let mut pool = FixedEffectPool::new(&first);
                    pool.add(&first).map_err(|reason| combination_error(label, reason))?;
                    pool.add(&table).map_err(|reason| combination_error(label, reason))?;
                    State::Pooling { first, pool }
                }
                other => {
                    warn_mixed(label, other.kind().label());
                    State::Kept(ModelArtifact::RawCoefficient(first))
                }
            },
            State::One(first) => {
                debug!(
                    label,
                    kind = first.kind().label(),
                    "pass-through combination, keeping the first batch"
                );
                State::Kept(first)
            }
            State::Pooling { first, mut pool } => match artifact {
                ModelArtifact::RawCoefficient(table) => {
                    pool.add(&table).map_err(|reason| combination_error(label, reason))?;
                    State::Pooling { first, pool }
                }
                other => {
                    warn_mixed(label, other.kind().label());
                    State::Kept(ModelArtifact::RawCoefficient(first))
                }
            },
            kept @ State::Kept(_) => kept,
        };
        Ok(())
    }

    pub fn finish(self) -> Result<ModelArtifact, PipelineError> {
        match self.state {
            State::Empty => Err(combination_error(self.label, "no artifacts to combine".to_string())),
            State::One(artifact) | State::Kept(artifact) => Ok(artifact),
            State::Pooling { pool, .. } => pool
                .finish()
                .map(ModelArtifact::RawCoefficient)
                .map_err(|reason| combination_error(self.label, reason)),
        }
    }
}

fn combination_error(label: &str, reason: String) -> PipelineError {
    PipelineError::Combination {
        label: label.to_string(),
        reason,
    }
}

fn warn_mixed(label: &str, kind: &str) {
    warn!(
        label,
        kind, "mixed artifact kinds; no combination rule applies, keeping the first batch"
    );
}

/// Running sums for fixed-effect pooling: `Σ n_i β_i`, `Σ n_i² Cov_i` and `Σ n_i`,
/// plus unweighted sums for the equal-weight case where no batch reports rows.
#[derive(Debug, Clone)]
pub struct FixedEffectPool {
    names: Vec<String>,
    n_obs: usize,
    batches: usize,
    weighted_values: Vec<f64>,
    weighted_covariance: Vec<Vec<f64>>,
    plain_values: Vec<f64>,
    plain_covariance: Vec<Vec<f64>>,
}

impl FixedEffectPool {
    pub fn new(template: &CoefficientTable) -> Self {
        let p = template.len();
        Self {
            names: template.names.clone(),
            n_obs: 0,
            batches: 0,
            weighted_values: vec![0.0; p],
            weighted_covariance: vec![vec![0.0; p]; p],
            plain_values: vec![0.0; p],
            plain_covariance: vec![vec![0.0; p]; p],
        }
    }

    pub fn add(&mut self, table: &CoefficientTable) -> Result<(), String> {
        if table.names != self.names {
            return Err(format!(
                "coefficient names differ between batches: {:?} vs {:?}",
                self.names, table.names
            ));
        }
        let n = table.n_obs as f64;
        for i in 0..self.names.len() {
            self.weighted_values[i] += n * table.values[i];
            self.plain_values[i] += table.values[i];
            for j in 0..self.names.len() {
                self.weighted_covariance[i][j] += n * n * table.covariance[i][j];
                self.plain_covariance[i][j] += table.covariance[i][j];
            }
        }
        self.n_obs += table.n_obs;
        self.batches += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<CoefficientTable, String> {
        if self.batches == 0 {
            return Err("no coefficient tables".to_string());
        }
        let (values, covariance, scale) = if self.n_obs == 0 {
            (self.plain_values, self.plain_covariance, self.batches as f64)
        } else {
            (self.weighted_values, self.weighted_covariance, self.n_obs as f64)
        };
        let values = values.into_iter().map(|v| v / scale).collect();
        let covariance = covariance
            .into_iter()
            .map(|row| row.into_iter().map(|c| c / (scale * scale)).collect())
            .collect();
        CoefficientTable::new(self.names, values, covariance, self.n_obs)
    }
}

/// `Σ w_i β_i` and `Σ w_i² Cov_i` with `w_i = n_i / Σ n`; equal weights when no batch reports rows.
pub fn pool_fixed_effect(tables: &[&CoefficientTable]) -> Result<CoefficientTable, String> {
    let first = tables.first().ok_or_else(|| "no coefficient tables".to_string())?;
    let mut pool = FixedEffectPool::new(first);
    for table in tables {
        pool.add(table)?;
    }
    pool.finish()
}
