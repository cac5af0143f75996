use chrono::NaiveDate;
use poolcast_application::config::{Config, CvStandardization, RequiredConfig};
use poolcast_application::cross_validation::cross_validate;
use poolcast_application::experiment::run_experiment;
use poolcast_application::fitting::complete_pooling::{fit_complete_pooling, ROBUST_POOLED};
use poolcast_application::fitting::no_pooling::fit_no_pooling;
use poolcast_application::fitting::{FitContext, FitSettings, Paradigm};
use poolcast_domain::entities::dataset::Dataset;
use poolcast_domain::entities::evaluation::Metric;
use poolcast_domain::errors::PipelineError;
use poolcast_domain::repositories::regression::{
    DesignMatrix, MixedEffectsOptions, Priors, RegressionBackend, RobustOptions, SamplingBudget,
};
use poolcast_domain::services::batching::BatchPolicy;
use poolcast_domain::value_objects::artifact::{
    ArtifactKind, CoefficientTable, HierarchicalFit, LinearFit, MixedFit, ModelArtifact, VarianceComponents,
};
use poolcast_domain::value_objects::entity::EntityMeta;
use poolcast_domain::value_objects::observation::Observation;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

/// Intercept-only "fit": the mean target, zero slopes.
#[derive(Default)]
struct MeanBackend {
    fail_bayes_for: Option<&'static str>,
    fail_everything: bool,
    /// Robust fits fail unless this target value is among the training rows.
    robust_requires_target: Option<f64>,
    calls: AtomicUsize,
    threads: Mutex<Vec<ThreadId>>,
}

impl MeanBackend {
    fn linear(&self, design: &DesignMatrix) -> Result<LinearFit, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.threads.lock().unwrap().push(std::thread::current().id());
        if self.fail_everything {
            return Err("solver unavailable".to_string());
        }
        let p = design.n_cols();
        let mean = design.y.iter().sum::<f64>() / design.n_rows() as f64;
        let mut values = vec![0.0; p];
        values[0] = mean;
        let covariance = (0..p)
            .map(|i| (0..p).map(|j| if i == j { 0.01 } else { 0.0 }).collect())
            .collect();
        Ok(LinearFit {
            coefficients: CoefficientTable::new(
                design.coefficient_names.clone(),
                values,
                covariance,
                design.n_rows(),
            )?,
            diagnostics: serde_json::json!({ "fake": true }),
        })
    }
}

impl RegressionBackend for MeanBackend {
    fn fit_ols(&self, design: &DesignMatrix) -> Result<ModelArtifact, String> {
        Ok(ModelArtifact::Ols(self.linear(design)?))
    }

    fn fit_robust(&self, design: &DesignMatrix, _options: &RobustOptions) -> Result<ModelArtifact, String> {
        if let Some(target) = self.robust_requires_target {
            if !design.y.iter().any(|y| (y - target).abs() < 1e-12) {
                return Err(format!("no training row with target {target}"));
            }
        }
        Ok(ModelArtifact::Robust(self.linear(design)?))
    }

    fn fit_glm(&self, design: &DesignMatrix) -> Result<ModelArtifact, String> {
        Ok(ModelArtifact::Glm(self.linear(design)?))
    }

    fn fit_bayesian(
        &self,
        design: &DesignMatrix,
        _priors: &Priors,
        _budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        if let Some(entity) = self.fail_bayes_for {
            if design.entity_ids.iter().any(|e| e == entity) {
                return Err(format!("sampler diverged for {entity}"));
            }
        }
        Ok(ModelArtifact::Bayesian(self.linear(design)?))
    }

    fn fit_bayesian_pooled(
        &self,
        design: &DesignMatrix,
        _priors: &Priors,
        _budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        Ok(ModelArtifact::BayesianPooled(self.linear(design)?))
    }

    fn fit_bayesian_hierarchical(
        &self,
        design: &DesignMatrix,
        _priors: &Priors,
        _budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        Ok(ModelArtifact::BayesianHierarchical(HierarchicalFit {
            fit: self.linear(design)?,
            intercept_offsets: BTreeMap::new(),
        }))
    }

    fn fit_mixed_effects(
        &self,
        design: &DesignMatrix,
        _options: &MixedEffectsOptions,
    ) -> Result<ModelArtifact, String> {
        Ok(ModelArtifact::MixedEffects(MixedFit {
            fit: self.linear(design)?,
            group_effects: BTreeMap::new(),
            entity_effects: BTreeMap::new(),
            variance_components: VarianceComponents {
                residual: 1.0,
                group: 0.0,
                entity: 0.0,
            },
        }))
    }
}

fn entities() -> BTreeMap<String, EntityMeta> {
    BTreeMap::from([
        (
            "AAPL".to_string(),
            EntityMeta {
                benchmark_group: "SPY".to_string(),
                category_label: "tech".to_string(),
            },
        ),
        (
            "SPY".to_string(),
            EntityMeta {
                benchmark_group: "SPY".to_string(),
                category_label: "benchmark".to_string(),
            },
        ),
    ])
}

fn features() -> Vec<String> {
    vec!["sma_5".to_string(), "rsi_14".to_string()]
}

/// Two entities x `days` daily rows with distinct target levels.
fn two_entity_dataset(days: i64) -> Dataset {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut rows = Vec::new();
    for (entity, level) in [("AAPL", 10.0), ("SPY", 50.0)] {
        for d in 0..days {
            let t = d as f64;
            rows.push(Observation {
                entity_id: entity.to_string(),
                date: start + chrono::Duration::days(d),
                features: vec![Some(level + t.sin()), Some(50.0 + 10.0 * (t / 3.0).cos())],
                target: Some(level + 0.1 * t),
            });
        }
    }
    Dataset::new(features(), rows).unwrap()
}

fn small_batches(pool_batches: bool) -> BatchPolicy {
    BatchPolicy {
        batch_size: 10,
        min_batch: 10,
        reclaim_every: 1,
        workers: 1,
        pool_batches,
    }
}

fn config(folds: usize) -> Config {
    let mut config = Config::for_dataset("close", features(), entities(), 17, folds);
    config.required = Some(RequiredConfig {
        tradable: vec!["AAPL".to_string()],
        benchmarks: vec!["SPY".to_string()],
    });
    config
}

#[test]
fn no_pooling_fits_each_entity_independently() {
    let backend = MeanBackend::default();
    let config = config(3);
    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(&config);
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 1,
        workers: 2,
    };

    let collection = fit_no_pooling(&ctx, &two_entity_dataset(30)).expect("no pooling");
    assert_eq!(collection.len(), 6);
    assert_eq!(collection.present_count(), 6);

    let aapl = collection.get("AAPL_linear").and_then(|a| a.coefficients()).unwrap();
    let spy = collection.get("SPY_linear").and_then(|a| a.coefficients()).unwrap();
    assert_eq!(aapl.n_obs, 30);
    assert_eq!(spy.n_obs, 30);
    assert!((aapl.values[0] - (10.0 + 0.1 * 14.5)).abs() < 1e-9);
    assert!((spy.values[0] - (50.0 + 0.1 * 14.5)).abs() < 1e-9);
}

#[test]
fn one_failed_entity_fit_does_not_block_the_others() {
    let backend = MeanBackend {
        fail_bayes_for: Some("SPY"),
        ..MeanBackend::default()
    };
    let config = config(3);
    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(&config);
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 1,
        workers: 1,
    };

    let collection = fit_no_pooling(&ctx, &two_entity_dataset(30)).expect("no pooling");
    assert_eq!(collection.absent_names(), vec!["SPY_bayes"]);
    assert!(collection.get("SPY_glm").is_some());
    assert!(collection.get("AAPL_bayes").is_some());
}

#[test]
fn cross_validation_splits_thirty_days_into_three_folds_of_ten() {
    let backend = MeanBackend::default();
    let config = config(3);
    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(&config);
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 9,
        workers: 3,
    };

    let report = cross_validate(&ctx, &two_entity_dataset(30), 3, CvStandardization::FoldLocal)
        .expect("cross-validation");
    assert_eq!(report.folds.len(), 3);
    for (idx, fold) in report.folds.iter().enumerate() {
        let fold = fold.as_ref().expect("fold succeeded");
        assert_eq!(fold.fold, idx);
        assert_eq!(fold.test_rows, 20);
        assert_eq!(fold.train_rows, 40);
        assert_eq!(fold.evaluations.len(), Paradigm::ALL.len());
    }

    assert_eq!(report.summary.folds_succeeded, 3);
    let no_pooling = &report.summary.models["no_pooling"];
    assert_eq!(no_pooling.matrix.len(), 3);
    assert_eq!(no_pooling.mean[&Metric::NPredictions], Some(20.0));
    assert!(no_pooling.mean[&Metric::Rmse].is_some());
}

#[test]
fn cross_validation_fails_when_every_fold_fails() {
    let backend = MeanBackend {
        fail_everything: true,
        ..MeanBackend::default()
    };
    let config = config(3);
    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(&config);
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 9,
        workers: 1,
    };

    let err = cross_validate(&ctx, &two_entity_dataset(30), 3, CvStandardization::None).unwrap_err();
    assert_eq!(err, PipelineError::AllFoldsFailed { folds: 3 });
    assert!(backend.calls.load(Ordering::Relaxed) > 0);
}

#[test]
fn experiment_reports_cv_final_models_and_holdout_scores() {
    let backend = MeanBackend::default();
    let mut config = config(3);
    config.run.holdout_fraction = Some(0.2);

    let report = run_experiment(&two_entity_dataset(30), &config, &backend).expect("experiment");
    // 30 dates, 20% holdout -> 6 test dates x 2 entities
    assert_eq!(report.test_rows, 12);
    assert_eq!(report.train_rows, 48);
    assert_eq!(report.final_models.len(), 3);
    assert_eq!(report.test_evaluations.len(), 3);
    assert_eq!(report.final_models[&Paradigm::PartialPooling].len(), 2);
    assert_eq!(report.cv.summary.folds_succeeded, 3);
    assert!(report
        .cv
        .folds
        .iter()
        .flatten()
        .all(|fold| fold.test_rows == 16));

    let json = serde_json::to_value(&report).expect("report serializes");
    assert!(json["final_models"]["no_pooling"]["AAPL_linear"]["kind"] == "ols");
}

#[test]
fn experiment_rejects_missing_required_entities() {
    let backend = MeanBackend::default();
    let mut config = config(3);
    config.required = Some(RequiredConfig {
        tradable: vec!["AAPL".to_string(), "MSFT".to_string()],
        benchmarks: vec!["SPY".to_string()],
    });
    let err = run_experiment(&two_entity_dataset(30), &config, &backend).unwrap_err();
    assert_eq!(err, PipelineError::MissingEntities(vec!["MSFT".to_string()]));
    assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
}

#[test]
fn batched_pooled_fits_train_on_every_row() {
    let config = config(3);
    let catalog = config.entity_catalog();
    let data = two_entity_dataset(30);

    for pool_batches in [false, true] {
        let backend = MeanBackend::default();
        let mut settings = FitSettings::from_config(&config);
        settings.batch = small_batches(pool_batches);
        let ctx = FitContext {
            backend: &backend,
            catalog: &catalog,
            settings: &settings,
            seed: 1,
            workers: 1,
        };

        let collection = fit_complete_pooling(&ctx, &data).expect("complete pooling");
        let robust = collection.get(ROBUST_POOLED).unwrap();
        let table = robust.coefficients().unwrap();
        assert_eq!(table.n_obs, data.len(), "pool_batches = {pool_batches}");
        // (10 + 50) + 0.1 * 14.5
        assert!((table.values[0] - 31.45).abs() < 1e-9);
        if pool_batches {
            assert_eq!(robust.kind(), ArtifactKind::RawCoefficient);
            // six batches for each of the two pooled fits
            assert_eq!(backend.calls.load(Ordering::Relaxed), 12);
        } else {
            assert_eq!(robust.kind(), ArtifactKind::Robust);
            // first batch plus one whole-dataset fit, for each of the two pooled fits
            assert_eq!(backend.calls.load(Ordering::Relaxed), 4);
        }
    }
}

#[test]
fn batches_of_one_fit_share_the_worker_pool() {
    let backend = MeanBackend::default();
    let config = config(3);
    let catalog = config.entity_catalog();
    let mut settings = FitSettings::from_config(&config);
    settings.batch = small_batches(true);
    settings.batch.reclaim_every = 3;
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 1,
        workers: 3,
    };

    fit_complete_pooling(&ctx, &two_entity_dataset(30)).expect("complete pooling");
    let caller = std::thread::current().id();
    let threads = backend.threads.lock().unwrap();
    assert_eq!(threads.len(), 12);
    assert!(threads.iter().all(|id| *id != caller));
}

#[test]
fn parallel_entities_fit_their_batches_serially() {
    let backend = MeanBackend::default();
    let config = config(3);
    let catalog = config.entity_catalog();
    let mut settings = FitSettings::from_config(&config);
    settings.batch = small_batches(true);
    settings.batch.reclaim_every = 3;
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 1,
        workers: 2,
    };

    let collection = fit_no_pooling(&ctx, &two_entity_dataset(30)).expect("no pooling");
    assert_eq!(collection.present_count(), 6);
    let distinct: HashSet<ThreadId> = backend.threads.lock().unwrap().iter().copied().collect();
    // one pool thread per entity; nested batch pools would add more
    assert!(distinct.len() <= 2, "{} threads", distinct.len());
}

#[test]
fn failed_fold_is_excluded_while_the_others_are_aggregated() {
    // day 0 of AAPL (target 10.0) is in every training set except fold 0's
    let backend = MeanBackend {
        robust_requires_target: Some(10.0),
        ..MeanBackend::default()
    };
    let config = config(3);
    let catalog = config.entity_catalog();
    let settings = FitSettings::from_config(&config);
    let ctx = FitContext {
        backend: &backend,
        catalog: &catalog,
        settings: &settings,
        seed: 9,
        workers: 1,
    };

    let report = cross_validate(&ctx, &two_entity_dataset(30), 3, CvStandardization::None)
        .expect("two folds still succeed");
    assert!(report.folds[0].is_none());
    assert!(report.folds[1].is_some());
    assert!(report.folds[2].is_some());
    assert_eq!(report.summary.folds_requested, 3);
    assert_eq!(report.summary.folds_succeeded, 2);
    for paradigm in Paradigm::ALL {
        let model = &report.summary.models[paradigm.label()];
        assert_eq!(model.matrix.len(), 2, "{paradigm}");
        assert_eq!(model.mean[&Metric::NPredictions], Some(20.0));
    }
}
