mod gibbs;
mod least_squares;
mod levels;
mod linalg;
mod reml;

use gibbs::{GibbsSpec, Noise, Posterior};
use levels::Levels;
use linalg::to_rows;
use poolcast_domain::repositories::regression::{
    DesignMatrix, MixedEffectsOptions, Priors, RegressionBackend, RobustOptions, SamplingBudget,
};
use poolcast_domain::value_objects::artifact::{
    CoefficientTable, HierarchicalFit, LinearFit, MixedFit, ModelArtifact, VarianceComponents,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// In-process solvers: normal equations, Huber IRLS, Gaussian GLM, Gibbs sampling and EM-REML.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeRegressionBackend;

impl NativeRegressionBackend {
    pub fn new() -> Self {
        Self
    }
}

fn observe<T>(method: &'static str, design: &DesignMatrix, fit: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    let started = Instant::now();
    let result = fit();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("poolcast.solver.fit_ms", "method" => method).record(elapsed_ms);
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("poolcast.solver.fits_total", "method" => method, "result" => outcome).increment(1);
    debug!(method, rows = design.n_rows(), elapsed_ms, outcome, "solver finished");
    result.map_err(|err| format!("{method}: {err}"))
}

fn posterior_fit(design: &DesignMatrix, posterior: &Posterior, sampler: &str, budget: &SamplingBudget) -> Result<LinearFit, String> {
    let coefficients = CoefficientTable::new(
        design.coefficient_names.clone(),
        posterior.beta_mean.clone(),
        posterior.beta_cov.clone(),
        design.n_rows(),
    )?;
    let rhat: BTreeMap<&str, Option<f64>> = design
        .coefficient_names
        .iter()
        .map(String::as_str)
        .zip(posterior.rhat.iter().copied())
        .collect();
    Ok(LinearFit {
        coefficients,
        diagnostics: json!({
            "sampler": sampler,
            "chains": budget.chains,
            "warmup": budget.warmup,
            "draws": posterior.draws,
            "sigma": posterior.sigma2_mean.sqrt(),
            "tau": posterior.tau2_means.iter().map(|t| t.sqrt()).collect::<Vec<_>>(),
            "rhat": rhat,
            "dropped_rows": design.dropped_rows,
        }),
    })
}

/// Per-row effect sums collapsed to one value per key; every row of a key shares its level.
fn keyed_effects(keys: &[String], values: impl Fn(usize) -> f64) -> BTreeMap<String, f64> {
    keys.iter()
        .enumerate()
        .map(|(row, key)| (key.clone(), values(row)))
        .collect()
}

impl RegressionBackend for NativeRegressionBackend {
    fn fit_ols(&self, design: &DesignMatrix) -> Result<ModelArtifact, String> {
        observe("ols", design, || least_squares::ols(design)).map(ModelArtifact::Ols)
    }

    fn fit_robust(&self, design: &DesignMatrix, options: &RobustOptions) -> Result<ModelArtifact, String> {
        observe("robust", design, || least_squares::robust(design, options)).map(ModelArtifact::Robust)
    }

    fn fit_glm(&self, design: &DesignMatrix) -> Result<ModelArtifact, String> {
        observe("glm", design, || least_squares::glm_gaussian(design)).map(ModelArtifact::Glm)
    }

    fn fit_bayesian(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        observe("bayesian", design, || {
            let posterior = gibbs::sample(&GibbsSpec {
                design,
                priors,
                budget,
                noise: Noise::Gaussian,
                effects: Vec::new(),
            })?;
            posterior_fit(design, &posterior, "gibbs", budget)
        })
        .map(ModelArtifact::Bayesian)
    }

    fn fit_bayesian_pooled(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        observe("bayesian_pooled", design, || {
            let posterior = gibbs::sample(&GibbsSpec {
                design,
                priors,
                budget,
                noise: Noise::StudentT { df: priors.noise_df },
                effects: Vec::new(),
            })?;
            posterior_fit(design, &posterior, "gibbs_student_t", budget)
        })
        .map(ModelArtifact::BayesianPooled)
    }

    fn fit_bayesian_hierarchical(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String> {
        observe("bayesian_hierarchical", design, || {
            let groups = Levels::groups(design);
            let entities = Levels::nested_entities(design);
            let posterior = gibbs::sample(&GibbsSpec {
                design,
                priors,
                budget,
                noise: Noise::Gaussian,
                effects: vec![groups.clone(), entities.clone()],
            })?;
            let intercept_offsets = keyed_effects(&design.entity_ids, |row| {
                posterior.effect_means[0][groups.index[row]] + posterior.effect_means[1][entities.index[row]]
            });
            Ok(HierarchicalFit {
                fit: posterior_fit(design, &posterior, "gibbs_hierarchical", budget)?,
                intercept_offsets,
            })
        })
        .map(ModelArtifact::BayesianHierarchical)
    }

    fn fit_mixed_effects(
        &self,
        design: &DesignMatrix,
        options: &MixedEffectsOptions,
    ) -> Result<ModelArtifact, String> {
        observe("mixed_effects", design, || {
            let groups = Levels::groups(design);
            let entities = Levels::nested_entities(design);
            let fit = reml::fit(design, &groups, &entities, options)?;
            let coefficients = CoefficientTable::new(
                design.coefficient_names.clone(),
                fit.beta.clone(),
                to_rows(&fit.beta_cov),
                design.n_rows(),
            )?;
            let group_effects = keyed_effects(&design.groups, |row| fit.group_effects[groups.index[row]]);
            let entity_effects = keyed_effects(&design.entity_ids, |row| fit.entity_effects[entities.index[row]]);
            Ok(MixedFit {
                fit: LinearFit {
                    coefficients,
                    diagnostics: json!({
                        "method": "em_reml",
                        "iterations": fit.iterations,
                        "converged": fit.converged,
                        "dropped_rows": design.dropped_rows,
                    }),
                },
                group_effects,
                entity_effects,
                variance_components: VarianceComponents {
                    residual: fit.sigma2,
                    group: fit.tau2_group,
                    entity: fit.tau2_entity,
                },
            })
        })
        .map(ModelArtifact::MixedEffects)
    }
}
