use crate::config::CvStandardization;
use crate::fitting::{fit_paradigm, FitContext, Paradigm};
use crate::shared::derive_seed;
use poolcast_domain::entities::cross_validation::{CvSummary, FoldResult};
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::evaluation::EvaluationResult;
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::services::evaluator::evaluate;
use poolcast_domain::services::folds::{plan_time_folds, split_fold, FoldPlan};
use poolcast_domain::services::predictor::predict;
use poolcast_domain::services::preprocessing::Standardizer;
use poolcast_domain::services::summary::summarize;
use poolcast_domain::services::workers::run_indexed;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, info_span, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationReport {
    /// One slot per planned fold; `None` marks a failed fold.
    pub folds: Vec<Option<FoldResult>>,
    pub summary: CvSummary,
}

/// Time-blocked k-fold cross-validation of every pooling paradigm.
pub fn cross_validate(
    ctx: &FitContext<'_>,
    dataset: &Dataset,
    k: usize,
    standardization: CvStandardization,
) -> Result<CrossValidationReport, PipelineError> {
    let sorted = dataset.sorted_by_date();
    let plans = plan_time_folds(&sorted.unique_dates(), k)?;

    let span = info_span!("cross_validate", folds = k, rows = sorted.len());
    let _guard = span.enter();

    // Parallel folds run their inner fits serially.
    let inner = if ctx.workers > 1 && plans.len() > 1 {
        ctx.serial()
    } else {
        *ctx
    };

    let outcomes = run_indexed(&plans, ctx.workers, |_, plan| {
        let fold_ctx = inner.with_seed(derive_seed(ctx.seed, &format!("fold{}", plan.fold)));
        match run_fold(&fold_ctx, &sorted, plan, standardization) {
            Ok(result) => {
                metrics::counter!("poolcast.cv.folds_total", "result" => "ok").increment(1);
                Some(result)
            }
            Err(err) => {
                metrics::counter!("poolcast.cv.folds_total", "result" => "error").increment(1);
                warn!(fold = plan.fold, error = %err, "fold failed; excluded from aggregation");
                None
            }
        }
    });

    let succeeded = outcomes.iter().filter(|o| o.is_some()).count();
    if succeeded == 0 {
        return Err(PipelineError::AllFoldsFailed { folds: plans.len() });
    }
    info!(succeeded, folds = plans.len(), "cross-validation complete");

    let summary = summarize(&outcomes, k);
    Ok(CrossValidationReport {
        folds: outcomes,
        summary,
    })
}

fn run_fold(
    ctx: &FitContext<'_>,
    dataset: &Dataset,
    plan: &FoldPlan,
    standardization: CvStandardization,
) -> Result<FoldResult, PipelineError> {
    let (train, test) = split_fold(dataset, plan);
    let (Some(test_start), Some(test_end)) = (plan.test_start(), plan.test_end()) else {
        return Err(PipelineError::InvalidInput(format!(
            "fold {} has no test dates",
            plan.fold
        )));
    };
    if train.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "fold {} has no training rows",
            plan.fold
        )));
    }

    let (train, test) = standardize_fold(train, test, standardization);

    let mut evaluations = BTreeMap::new();
    for paradigm in Paradigm::ALL {
        let collection = fit_paradigm(paradigm, ctx, &train)?;
        evaluations.insert(paradigm.label().to_string(), evaluate_collection(&collection, &test));
    }

    Ok(FoldResult {
        fold: plan.fold,
        test_start,
        test_end,
        train_rows: train.len(),
        test_rows: test.len(),
        evaluations,
    })
}

/// Scaling parameters come from the training rows only and are applied to both sides.
pub(crate) fn standardize_fold(
    train: Dataset,
    test: Dataset,
    standardization: CvStandardization,
) -> (Dataset, Dataset) {
    match standardization {
        CvStandardization::FoldLocal => {
            let scaler = Standardizer::fit(&train);
            (scaler.apply(&train), scaler.apply(&test))
        }
        CvStandardization::None => (train, test),
    }
}

/// Ensembled prediction of `collection` on `data`, scored against its targets.
pub fn evaluate_collection(collection: &ModelCollection, data: &Dataset) -> EvaluationResult {
    let predictions = predict(collection, data.feature_names(), data.rows());
    evaluate(predictions.as_deref(), &data.targets())
}
