use crate::entities::dataset::{Dataset, EntityCatalog};
use crate::value_objects::artifact::{ModelArtifact, INTERCEPT};
use serde::{Deserialize, Serialize};

/// Group label used when no catalog is supplied.
pub const UNGROUPED: &str = "ungrouped";

/// Dense regression design: a leading intercept column followed by every feature.
/// Only rows with a finite target and finite features are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub coefficient_names: Vec<String>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub entity_ids: Vec<String>,
    pub groups: Vec<String>,
    pub dropped_rows: usize,
}

impl DesignMatrix {
    pub fn from_dataset(dataset: &Dataset, catalog: Option<&EntityCatalog>) -> Result<Self, String> {
        let coefficient_names: Vec<String> = std::iter::once(INTERCEPT.to_string())
            .chain(dataset.feature_names().iter().cloned())
            .collect();
        let mut x = Vec::with_capacity(dataset.len());
        let mut y = Vec::with_capacity(dataset.len());
        let mut entity_ids = Vec::with_capacity(dataset.len());
        let mut groups = Vec::with_capacity(dataset.len());
        let mut dropped_rows = 0usize;

        for row in dataset.rows() {
            let Some(target) = row.target.filter(|v| v.is_finite()) else {
                dropped_rows += 1;
                continue;
            };
            let features: Option<Vec<f64>> = row
                .features
                .iter()
                .map(|v| v.filter(|f| f.is_finite()))
                .collect();
            let Some(features) = features else {
                dropped_rows += 1;
                continue;
            };
            let group = match catalog {
                Some(catalog) => catalog
                    .meta(&row.entity_id)
                    .map_err(|err| err.to_string())?
                    .benchmark_group
                    .clone(),
                None => UNGROUPED.to_string(),
            };
            let mut design_row = Vec::with_capacity(features.len() + 1);
            design_row.push(1.0);
            design_row.extend(features);
            x.push(design_row);
            y.push(target);
            entity_ids.push(row.entity_id.clone());
            groups.push(group);
        }

        if x.is_empty() {
            return Err(format!(
                "no complete rows to fit ({} row(s) dropped for missing values)",
                dropped_rows
            ));
        }

        Ok(Self {
            coefficient_names,
            x,
            y,
            entity_ids,
            groups,
            dropped_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    pub fn n_cols(&self) -> usize {
        self.coefficient_names.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Priors {
    /// Std of the Normal(0, s²) prior on each slope.
    pub slope_scale: f64,
    /// Scale of the Student-t intercept prior.
    pub intercept_scale: f64,
    pub intercept_df: f64,
    /// Degrees of freedom of the Student-t observation noise in pooled fits.
    pub noise_df: f64,
    /// Inverse-gamma shape/rate shared by every variance parameter.
    pub variance_shape: f64,
    pub variance_rate: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            slope_scale: 10.0,
            intercept_scale: 10.0,
            intercept_df: 3.0,
            noise_df: 4.0,
            variance_shape: 2.0,
            variance_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplingBudget {
    pub chains: usize,
    pub iterations: usize,
    pub warmup: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobustOptions {
    /// Huber tuning constant in units of the residual scale.
    pub tuning: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for RobustOptions {
    fn default() -> Self {
        Self {
            tuning: 1.345,
            max_iter: 50,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixedEffectsOptions {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for MixedEffectsOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tolerance: 1e-6,
        }
    }
}

/// Statistical solver port. Every fit is a local failure on `Err`.
pub trait RegressionBackend: Send + Sync {
    fn fit_ols(&self, design: &DesignMatrix) -> Result<ModelArtifact, String>;

    fn fit_robust(&self, design: &DesignMatrix, options: &RobustOptions) -> Result<ModelArtifact, String>;

    /// Gaussian family, identity link.
    fn fit_glm(&self, design: &DesignMatrix) -> Result<ModelArtifact, String>;

    fn fit_bayesian(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String>;

    /// Student-t observation noise.
    fn fit_bayesian_pooled(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String>;

    /// Random intercepts for each group and each entity within its group.
    fn fit_bayesian_hierarchical(
        &self,
        design: &DesignMatrix,
        priors: &Priors,
        budget: &SamplingBudget,
    ) -> Result<ModelArtifact, String>;

    fn fit_mixed_effects(
        &self,
        design: &DesignMatrix,
        options: &MixedEffectsOptions,
    ) -> Result<ModelArtifact, String>;
}
