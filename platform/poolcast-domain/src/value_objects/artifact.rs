use serde::Serialize;
use std::collections::BTreeMap;

pub const INTERCEPT: &str = "intercept";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Ols,
    Robust,
    Glm,
    Bayesian,
    BayesianPooled,
    BayesianHierarchical,
    MixedEffects,
    RawCoefficient,
    Bundle,
}

impl ArtifactKind {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Ols => "ols",
            ArtifactKind::Robust => "robust",
            ArtifactKind::Glm => "glm",
            ArtifactKind::Bayesian => "bayesian",
            ArtifactKind::BayesianPooled => "bayesian_pooled",
            ArtifactKind::BayesianHierarchical => "bayesian_hierarchical",
            ArtifactKind::MixedEffects => "mixed_effects",
            ArtifactKind::RawCoefficient => "raw_coefficient",
            ArtifactKind::Bundle => "bundle",
        }
    }
}

/// Point estimates with their covariance, in coefficient-name order.
/// `covariance` is square and row-major; `n_obs` is the number of rows backing the fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientTable {
    pub names: Vec<String>,
    pub values: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub n_obs: usize,
}

impl CoefficientTable {
    pub fn new(
        names: Vec<String>,
        values: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        n_obs: usize,
    ) -> Result<Self, String> {
        let p = names.len();
        if values.len() != p {
            return Err(format!(
                "coefficient values length {} does not match names length {p}",
                values.len()
            ));
        }
        if covariance.len() != p || covariance.iter().any(|row| row.len() != p) {
            return Err(format!("coefficient covariance must be {p}x{p}"));
        }
        Ok(Self {
            names,
            values,
            covariance,
            n_obs,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    pub fn variances(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.covariance[i][i]).collect()
    }

    pub fn standard_errors(&self) -> Vec<f64> {
        self.variances()
            .into_iter()
            .map(|v| v.max(0.0).sqrt())
            .collect()
    }

    /// Maps every coefficient to its feature column; `None` marks the intercept.
    pub fn column_map(&self, feature_names: &[String]) -> Result<Vec<Option<usize>>, String> {
        self.names
            .iter()
            .map(|name| {
                if name == INTERCEPT {
                    return Ok(None);
                }
                feature_names
                    .iter()
                    .position(|f| f == name)
                    .map(Some)
                    .ok_or_else(|| format!("coefficient '{name}' has no matching feature column"))
            })
            .collect()
    }

    /// Linear predictor for one feature vector; `None` when a used feature is missing.
    pub fn linear_predictor(&self, columns: &[Option<usize>], features: &[Option<f64>]) -> Option<f64> {
        let mut acc = 0.0;
        for (value, column) in self.values.iter().zip(columns) {
            match column {
                None => acc += value,
                Some(idx) => {
                    let x = features.get(*idx).copied().flatten()?;
                    if !x.is_finite() {
                        return None;
                    }
                    acc += value * x;
                }
            }
        }
        acc.is_finite().then_some(acc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearFit {
    pub coefficients: CoefficientTable,
    pub diagnostics: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchicalFit {
    pub fit: LinearFit,
    /// Posterior-mean intercept shift (group + entity) keyed by entity id.
    pub intercept_offsets: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VarianceComponents {
    pub residual: f64,
    pub group: f64,
    pub entity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixedFit {
    pub fit: LinearFit,
    pub group_effects: BTreeMap<String, f64>,
    pub entity_effects: BTreeMap<String, f64>,
    pub variance_components: VarianceComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "fit", rename_all = "snake_case")]
pub enum ModelArtifact {
    Ols(LinearFit),
    Robust(LinearFit),
    Glm(LinearFit),
    Bayesian(LinearFit),
    BayesianPooled(LinearFit),
    BayesianHierarchical(HierarchicalFit),
    MixedEffects(MixedFit),
    RawCoefficient(CoefficientTable),
    Bundle(BTreeMap<String, ModelArtifact>),
}

impl ModelArtifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ModelArtifact::Ols(_) => ArtifactKind::Ols,
            ModelArtifact::Robust(_) => ArtifactKind::Robust,
            ModelArtifact::Glm(_) => ArtifactKind::Glm,
            ModelArtifact::Bayesian(_) => ArtifactKind::Bayesian,
            ModelArtifact::BayesianPooled(_) => ArtifactKind::BayesianPooled,
            ModelArtifact::BayesianHierarchical(_) => ArtifactKind::BayesianHierarchical,
            ModelArtifact::MixedEffects(_) => ArtifactKind::MixedEffects,
            ModelArtifact::RawCoefficient(_) => ArtifactKind::RawCoefficient,
            ModelArtifact::Bundle(_) => ArtifactKind::Bundle,
        }
    }

    pub fn coefficients(&self) -> Option<&CoefficientTable> {
        match self {
            ModelArtifact::Ols(fit)
            | ModelArtifact::Robust(fit)
            | ModelArtifact::Glm(fit)
            | ModelArtifact::Bayesian(fit)
            | ModelArtifact::BayesianPooled(fit) => Some(&fit.coefficients),
            ModelArtifact::BayesianHierarchical(h) => Some(&h.fit.coefficients),
            ModelArtifact::MixedEffects(m) => Some(&m.fit.coefficients),
            ModelArtifact::RawCoefficient(table) => Some(table),
            ModelArtifact::Bundle(_) => None,
        }
    }

    pub fn diagnostics(&self) -> Option<&serde_json::Value> {
        match self {
            ModelArtifact::Ols(fit)
            | ModelArtifact::Robust(fit)
            | ModelArtifact::Glm(fit)
            | ModelArtifact::Bayesian(fit)
            | ModelArtifact::BayesianPooled(fit) => Some(&fit.diagnostics),
            ModelArtifact::BayesianHierarchical(h) => Some(&h.fit.diagnostics),
            ModelArtifact::MixedEffects(m) => Some(&m.fit.diagnostics),
            ModelArtifact::RawCoefficient(_) | ModelArtifact::Bundle(_) => None,
        }
    }

    /// Reduces a fitted artifact to its bare coefficients so batches can be pooled.
    pub fn into_raw(self) -> Result<ModelArtifact, String> {
        match self {
            ModelArtifact::Ols(fit)
            | ModelArtifact::Robust(fit)
            | ModelArtifact::Glm(fit)
            | ModelArtifact::Bayesian(fit)
            | ModelArtifact::BayesianPooled(fit) => {
                Ok(ModelArtifact::RawCoefficient(fit.coefficients))
            }
            ModelArtifact::BayesianHierarchical(h) => {
                Ok(ModelArtifact::RawCoefficient(h.fit.coefficients))
            }
            ModelArtifact::MixedEffects(m) => Ok(ModelArtifact::RawCoefficient(m.fit.coefficients)),
            raw @ ModelArtifact::RawCoefficient(_) => Ok(raw),
            ModelArtifact::Bundle(_) => {
                Err("a bundle of named artifacts cannot be reduced to raw coefficients".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CoefficientTable {
        CoefficientTable::new(
            vec![INTERCEPT.to_string(), "rsi".to_string()],
            vec![1.0, 2.0],
            vec![vec![4.0, 0.0], vec![0.0, 9.0]],
            10,
        )
        .unwrap()
    }

    #[test]
    fn coefficient_table_rejects_mismatched_covariance() {
        let err = CoefficientTable::new(
            vec!["a".to_string()],
            vec![1.0],
            vec![vec![1.0, 0.0]],
            1,
        )
        .unwrap_err();
        assert!(err.contains("1x1"));
    }

    #[test]
    fn standard_errors_are_square_roots_of_the_diagonal() {
        assert_eq!(table().standard_errors(), vec![2.0, 3.0]);
    }

    #[test]
    fn linear_predictor_matches_features_by_name() {
        let t = table();
        let features = vec!["volatility".to_string(), "rsi".to_string()];
        let columns = t.column_map(&features).unwrap();
        assert_eq!(columns, vec![None, Some(1)]);
        assert_eq!(t.linear_predictor(&columns, &[Some(100.0), Some(3.0)]), Some(7.0));
        assert_eq!(t.linear_predictor(&columns, &[Some(100.0), None]), None);
    }

    #[test]
    fn column_map_fails_for_unknown_coefficient() {
        let err = table().column_map(&["volatility".to_string()]).unwrap_err();
        assert!(err.contains("rsi"));
    }

    #[test]
    fn into_raw_keeps_coefficients_and_rejects_bundles() {
        let artifact = ModelArtifact::Ols(LinearFit {
            coefficients: table(),
            diagnostics: serde_json::Value::Null,
        });
        let raw = artifact.into_raw().unwrap();
        assert_eq!(raw.kind(), ArtifactKind::RawCoefficient);
        assert_eq!(raw.coefficients(), Some(&table()));

        let bundle = ModelArtifact::Bundle(BTreeMap::new());
        assert!(bundle.into_raw().is_err());
    }
}
