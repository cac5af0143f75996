use crate::config::{Config, FinalStandardization};
use crate::cross_validation::{cross_validate, evaluate_collection, CrossValidationReport};
use crate::fitting::{fit_paradigm, FitContext, FitSettings, Paradigm};
use crate::shared::derive_seed;
use crate::validation::{project_features, validate_inputs};
use chrono::NaiveDate;
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::evaluation::EvaluationResult;
use poolcast_domain::entities::model_collection::ModelCollection;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::dataset_source::DatasetSource;
use poolcast_domain::repositories::regression::RegressionBackend;
use poolcast_domain::services::preprocessing::Standardizer;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, info_span};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub cv: CrossValidationReport,
    pub final_models: BTreeMap<Paradigm, ModelCollection>,
    /// Empty when no holdout dates were reserved.
    pub test_evaluations: BTreeMap<Paradigm, EvaluationResult>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub final_standardization: FinalStandardization,
}

pub fn run_experiment_from_source(
    source: &dyn DatasetSource,
    config: &Config,
    backend: &dyn RegressionBackend,
) -> Result<ExperimentReport, PipelineError> {
    let dataset = source.load_dataset()?;
    run_experiment(&dataset, config, backend)
}

/// Validate, cross-validate on the training dates, fit final models, score them on the holdout.
pub fn run_experiment(
    dataset: &Dataset,
    config: &Config,
    backend: &dyn RegressionBackend,
) -> Result<ExperimentReport, PipelineError> {
    config.validate().map_err(PipelineError::InvalidInput)?;
    validate_inputs(dataset, config)?;
    let dataset = project_features(dataset, &config.dataset.features)?.sorted_by_date();

    let span = info_span!("run_experiment", rows = dataset.len(), seed = config.run.seed);
    let _guard = span.enter();

    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(config);
    let ctx = FitContext {
        backend,
        catalog: &catalog,
        settings: &settings,
        seed: config.run.seed,
        workers: config.workers(),
    };
    let standardization = config.standardization();

    let holdout = holdout_dates(&dataset.unique_dates(), config.holdout_fraction());
    let (train, test) = dataset.partition_by_dates(&holdout);
    info!(
        train_rows = train.len(),
        test_rows = test.len(),
        holdout_dates = holdout.len(),
        "holdout split"
    );

    let cv = cross_validate(
        &ctx.with_seed(derive_seed(config.run.seed, "cv")),
        &train,
        config.run.folds,
        standardization.cross_validation,
    )?;

    let (final_train, final_test) = match standardization.final_model {
        FinalStandardization::FullDataset => {
            let scaler = Standardizer::fit(&dataset);
            (scaler.apply(&train), scaler.apply(&test))
        }
        FinalStandardization::TrainOnly => {
            let scaler = Standardizer::fit(&train);
            (scaler.apply(&train), scaler.apply(&test))
        }
        FinalStandardization::None => (train.clone(), test.clone()),
    };

    let final_ctx = ctx.with_seed(derive_seed(config.run.seed, "final"));
    let mut final_models = BTreeMap::new();
    let mut test_evaluations = BTreeMap::new();
    for paradigm in Paradigm::ALL {
        let collection = fit_paradigm(paradigm, &final_ctx, &final_train)?;
        if !final_test.is_empty() {
            test_evaluations.insert(paradigm, evaluate_collection(&collection, &final_test));
        }
        final_models.insert(paradigm, collection);
    }

    Ok(ExperimentReport {
        cv,
        final_models,
        test_evaluations,
        train_rows: final_train.len(),
        test_rows: final_test.len(),
        final_standardization: standardization.final_model,
    })
}

/// The last `ceil(n * fraction)` dates, never all of them.
fn holdout_dates(dates: &[NaiveDate], fraction: f64) -> BTreeSet<NaiveDate> {
    if dates.is_empty() || fraction <= 0.0 {
        return BTreeSet::new();
    }
    let wanted = (dates.len() as f64 * fraction).ceil() as usize;
    let take = wanted.min(dates.len().saturating_sub(1));
    dates[dates.len() - take..].iter().copied().collect()
}
