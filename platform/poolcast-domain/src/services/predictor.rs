use crate::entities::model_collection::ModelCollection;
use crate::value_objects::artifact::{CoefficientTable, ModelArtifact};
use crate::value_objects::observation::Observation;
use tracing::warn;

/// Ensembled prediction for `rows`; `None` when no member produced a value.
pub fn predict(
    collection: &ModelCollection,
    feature_names: &[String],
    rows: &[Observation],
) -> Option<Vec<Option<f64>>> {
    if collection.len() == 1 {
        let (name, artifact) = collection.iter().next()?;
        let artifact = artifact?;
        return match predict_artifact(artifact, feature_names, rows) {
            Ok(values) => Some(values),
            Err(err) => {
                warn!(model = name, error = %err, "prediction failed");
                None
            }
        };
    }

    let mut members = Vec::new();
    for (name, artifact) in collection.present() {
        match predict_artifact(artifact, feature_names, rows) {
            Ok(values) => {
                metrics::counter!("poolcast.predict.members_total", "result" => "ok").increment(1);
                members.push(values);
            }
            Err(err) => {
                metrics::counter!("poolcast.predict.members_total", "result" => "error").increment(1);
                warn!(model = name, error = %err, "ensemble member prediction failed; skipping");
            }
        }
    }
    ensemble_mean(&members, rows.len())
}

/// Paradigm-specific point prediction for a single artifact.
pub fn predict_artifact(
    artifact: &ModelArtifact,
    feature_names: &[String],
    rows: &[Observation],
) -> Result<Vec<Option<f64>>, String> {
    match artifact {
        ModelArtifact::Ols(fit)
        | ModelArtifact::Robust(fit)
        | ModelArtifact::Glm(fit)
        | ModelArtifact::Bayesian(fit)
        | ModelArtifact::BayesianPooled(fit) => linear(&fit.coefficients, feature_names, rows),
        ModelArtifact::RawCoefficient(table) => linear(table, feature_names, rows),
        ModelArtifact::MixedEffects(mixed) => linear(&mixed.fit.coefficients, feature_names, rows),
        ModelArtifact::BayesianHierarchical(hier) => {
            let population = linear(&hier.fit.coefficients, feature_names, rows)?;
            Ok(population
                .into_iter()
                .zip(rows)
                .map(|(value, row)| {
                    let offset = hier.intercept_offsets.get(&row.entity_id).copied().unwrap_or(0.0);
                    value.map(|v| v + offset)
                })
                .collect())
        }
        ModelArtifact::Bundle(members) => {
            let predictions: Vec<Vec<Option<f64>>> = members
                .iter()
                .filter_map(|(name, member)| match predict_artifact(member, feature_names, rows) {
                    Ok(values) => Some(values),
                    Err(err) => {
                        warn!(member = name.as_str(), error = %err, "bundle member prediction failed");
                        None
                    }
                })
                .collect();
            ensemble_mean(&predictions, rows.len())
                .ok_or_else(|| "no bundle member produced a prediction".to_string())
        }
    }
}

fn linear(
    table: &CoefficientTable,
    feature_names: &[String],
    rows: &[Observation],
) -> Result<Vec<Option<f64>>, String> {
    let columns = table.column_map(feature_names)?;
    Ok(rows
        .iter()
        .map(|row| table.linear_predictor(&columns, &row.features))
        .collect())
}

fn ensemble_mean(members: &[Vec<Option<f64>>], n_rows: usize) -> Option<Vec<Option<f64>>> {
    let mut any = false;
    let out: Vec<Option<f64>> = (0..n_rows)
        .map(|i| {
            let (sum, count) = members
                .iter()
                .filter_map(|m| m.get(i).copied().flatten())
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count == 0 {
                None
            } else {
                any = true;
                Some(sum / count as f64)
            }
        })
        .collect();
    any.then_some(out)
}
