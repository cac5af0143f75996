use crate::config::{Config, SamplingSection};
use crate::shared::derive_seed;
use poolcast_domain::entities::dataset::{Dataset, EntityCatalog};
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::{
    MixedEffectsOptions, Priors, RegressionBackend, RobustOptions, SamplingBudget,
};
use poolcast_domain::services::batching::{BatchExecutor, BatchPolicy};
use serde::Serialize;
use tracing::warn;

pub mod complete_pooling;
pub mod no_pooling;
pub mod partial_pooling;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Paradigm {
    NoPooling,
    PartialPooling,
    CompletePooling,
}

impl Paradigm {
    pub const ALL: [Paradigm; 3] = [
        Paradigm::NoPooling,
        Paradigm::PartialPooling,
        Paradigm::CompletePooling,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Paradigm::NoPooling => "no_pooling",
            Paradigm::PartialPooling => "partial_pooling",
            Paradigm::CompletePooling => "complete_pooling",
        }
    }
}

impl std::fmt::Display for Paradigm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Solver knobs shared by every fitter invocation of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSettings {
    pub batch: BatchPolicy,
    pub no_pooling_sampling: SamplingSection,
    pub pooled_sampling: SamplingSection,
    pub priors: Priors,
    pub robust: RobustOptions,
    pub mixed_effects: MixedEffectsOptions,
}

impl FitSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch: config.batch_policy(),
            no_pooling_sampling: config.no_pooling_sampling(),
            pooled_sampling: config.pooled_sampling(),
            priors: config.priors(),
            robust: config.robust(),
            mixed_effects: config.mixed_effects(),
        }
    }
}

/// Everything a fitter needs besides the rows it fits.
#[derive(Clone, Copy)]
pub struct FitContext<'a> {
    pub backend: &'a dyn RegressionBackend,
    pub catalog: &'a EntityCatalog,
    pub settings: &'a FitSettings,
    /// Seed scope for every sampled fit in this context.
    pub seed: u64,
    /// Worker-pool size for per-entity fits and for the batches of one fit.
    pub workers: usize,
}

impl<'a> FitContext<'a> {
    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    pub fn serial(self) -> Self {
        Self { workers: 1, ..self }
    }

    /// Batch executor sharing this context's worker pool size.
    pub fn executor(&self) -> BatchExecutor {
        BatchExecutor::new(self.settings.batch.with_workers(self.workers))
    }

    pub(crate) fn budget(&self, sampling: SamplingSection, label: &str) -> SamplingBudget {
        SamplingBudget {
            chains: sampling.chains,
            iterations: sampling.iterations,
            warmup: sampling.warmup,
            seed: derive_seed(self.seed, label),
        }
    }
}

pub fn fit_paradigm(
    paradigm: Paradigm,
    ctx: &FitContext<'_>,
    dataset: &Dataset,
) -> Result<ModelCollection, PipelineError> {
    let outcome = match paradigm {
        Paradigm::NoPooling => no_pooling::fit_no_pooling(ctx, dataset),
        Paradigm::PartialPooling => partial_pooling::fit_partial_pooling(ctx, dataset),
        Paradigm::CompletePooling => complete_pooling::fit_complete_pooling(ctx, dataset),
    };
    match &outcome {
        Ok(_) => {
            metrics::counter!(
                "poolcast.fit.calls_total",
                "paradigm" => paradigm.label(),
                "result" => "ok"
            )
            .increment(1);
        }
        Err(err) => {
            metrics::counter!(
                "poolcast.fit.calls_total",
                "paradigm" => paradigm.label(),
                "result" => "error"
            )
            .increment(1);
            warn!(paradigm = paradigm.label(), error = %err, "paradigm fit failed");
        }
    }
    outcome
}
