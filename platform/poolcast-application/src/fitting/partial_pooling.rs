use super::FitContext;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::DesignMatrix;
use tracing::info_span;

pub const HIERARCHICAL_BAYES: &str = "hierarchical_bayes";
pub const MIXED_EFFECTS: &str = "mixed_effects";

/// Entity-within-group random intercepts over the merged dataset, fitted twice:
/// sampled (Bayesian) and by REML.
pub fn fit_partial_pooling(
    ctx: &FitContext<'_>,
    dataset: &Dataset,
) -> Result<ModelCollection, PipelineError> {
    let span = info_span!("fit_partial_pooling", rows = dataset.len());
    let _guard = span.enter();

    let executor = ctx.executor();
    let settings = ctx.settings;
    let backend = ctx.backend;
    let catalog = ctx.catalog;

    let budget = ctx.budget(settings.pooled_sampling, HIERARCHICAL_BAYES);
    let hierarchical = executor.run(HIERARCHICAL_BAYES, dataset, |batch| {
        let design = DesignMatrix::from_dataset(batch, Some(catalog))?;
        backend.fit_bayesian_hierarchical(&design, &settings.priors, &budget)
    })?;

    let mixed = executor.run(MIXED_EFFECTS, dataset, |batch| {
        let design = DesignMatrix::from_dataset(batch, Some(catalog))?;
        backend.fit_mixed_effects(&design, &settings.mixed_effects)
    })?;

    Ok([
        (HIERARCHICAL_BAYES.to_string(), Some(hierarchical)),
        (MIXED_EFFECTS.to_string(), Some(mixed)),
    ]
    .into_iter()
    .collect())
}
