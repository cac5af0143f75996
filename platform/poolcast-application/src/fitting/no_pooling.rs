use super::FitContext;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::DesignMatrix;
use poolcast_domain::services::preprocessing::forward_backward_fill;
use poolcast_domain::services::workers::run_indexed;
use poolcast_domain::value_objects::artifact::ModelArtifact;
use tracing::{info_span, warn};

/// One OLS, one Bayesian and one GLM fit per entity; no parameters are shared.
/// Failures stay local to their (entity, model) entry.
pub fn fit_no_pooling(
    ctx: &FitContext<'_>,
    dataset: &Dataset,
) -> Result<ModelCollection, PipelineError> {
    let groups = dataset.group_by_entity();
    let span = info_span!("fit_no_pooling", entities = groups.len(), rows = dataset.len());
    let _guard = span.enter();

    for entity in ctx.catalog.ids() {
        if !groups.contains_key(entity) {
            warn!(entity, "entity has no rows; skipping");
        }
    }

    let entity_data: Vec<(String, Dataset)> = groups
        .iter()
        .filter(|(_, slice)| !slice.is_empty())
        .map(|(entity, slice)| (entity.clone(), dataset.with_rows(forward_backward_fill(slice))))
        .collect();

    // Parallel entities fit their batches serially.
    let inner = if ctx.workers > 1 && entity_data.len() > 1 {
        ctx.serial()
    } else {
        *ctx
    };
    let per_entity = run_indexed(&entity_data, ctx.workers, |_, (entity, data)| {
        fit_entity(&inner, entity, data)
    });

    Ok(per_entity.into_iter().flatten().collect())
}

fn fit_entity(
    ctx: &FitContext<'_>,
    entity: &str,
    data: &Dataset,
) -> Vec<(String, Option<ModelArtifact>)> {
    let executor = ctx.executor();
    let settings = ctx.settings;
    let backend = ctx.backend;

    let linear_label = format!("{entity}_linear");
    let linear = executor.run(&linear_label, data, |batch| {
        let design = DesignMatrix::from_dataset(batch, None)?;
        backend.fit_ols(&design)
    });

    let bayes_label = format!("{entity}_bayes");
    let budget = ctx.budget(settings.no_pooling_sampling, &bayes_label);
    let bayes = executor.run(&bayes_label, data, |batch| {
        let design = DesignMatrix::from_dataset(batch, None)?;
        backend.fit_bayesian(&design, &settings.priors, &budget)
    });

    let glm_label = format!("{entity}_glm");
    let glm = executor.run(&glm_label, data, |batch| {
        let design = DesignMatrix::from_dataset(batch, None)?;
        backend.fit_glm(&design)
    });

    [(linear_label, linear), (bayes_label, bayes), (glm_label, glm)]
        .into_iter()
        .map(|(label, outcome)| match outcome {
            Ok(artifact) => (label, Some(artifact)),
            Err(err) => {
                warn!(entity, model = label.as_str(), error = %err, "entity fit failed");
                (label, None)
            }
        })
        .collect()
}
