use super::FitContext;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::DesignMatrix;
use tracing::info_span;

pub const ROBUST_POOLED: &str = "robust_pooled";
pub const BAYES_POOLED: &str = "bayes_pooled";

/// All entities treated as one population: Huber M-estimation plus a Student-t noise Bayesian fit.
pub fn fit_complete_pooling(
    ctx: &FitContext<'_>,
    dataset: &Dataset,
) -> Result<ModelCollection, PipelineError> {
    let span = info_span!("fit_complete_pooling", rows = dataset.len());
    let _guard = span.enter();

    let executor = ctx.executor();
    let settings = ctx.settings;
    let backend = ctx.backend;

    let robust = executor.run(ROBUST_POOLED, dataset, |batch| {
        let design = DesignMatrix::from_dataset(batch, None)?;
        backend.fit_robust(&design, &settings.robust)
    })?;

    let budget = ctx.budget(settings.pooled_sampling, BAYES_POOLED);
    let bayes = executor.run(BAYES_POOLED, dataset, |batch| {
        let design = DesignMatrix::from_dataset(batch, None)?;
        backend.fit_bayesian_pooled(&design, &settings.priors, &budget)
    })?;

    Ok([
        (ROBUST_POOLED.to_string(), Some(robust)),
        (BAYES_POOLED.to_string(), Some(bayes)),
    ]
    .into_iter()
    .collect())
}
