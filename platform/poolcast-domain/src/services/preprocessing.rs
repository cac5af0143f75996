use crate::entities::dataset::{Dataset, EntitySlice};
use crate::value_objects::observation::Observation;
use serde::Serialize;

/// Forward-fills, then back-fills, missing feature values along the slice's date order.
/// Targets are left untouched.
pub fn forward_backward_fill(slice: &EntitySlice<'_>) -> Vec<Observation> {
    let mut rows: Vec<Observation> = slice.rows().iter().map(|r| (*r).clone()).collect();
    let width = rows.first().map(|r| r.features.len()).unwrap_or(0);
    for col in 0..width {
        let mut last: Option<f64> = None;
        for row in rows.iter_mut() {
            match row.features[col].filter(|v| v.is_finite()) {
                Some(v) => last = Some(v),
                None => row.features[col] = last,
            }
        }
        let mut next: Option<f64> = None;
        for row in rows.iter_mut().rev() {
            match row.features[col].filter(|v| v.is_finite()) {
                Some(v) => next = Some(v),
                None => row.features[col] = next,
            }
        }
    }
    rows
}

/// Per-feature centring and scaling learned from one dataset and applied to others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    /// Mean and population std over present values; all-missing columns get (0, 0).
    pub fn fit(dataset: &Dataset) -> Self {
        let width = dataset.feature_names().len();
        let mut means = vec![0.0; width];
        let mut stds = vec![0.0; width];
        for col in 0..width {
            let values: Vec<f64> = dataset
                .rows()
                .iter()
                .filter_map(|r| r.features[col])
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            let n = values.len() as f64;
            let m = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            means[col] = m;
            stds[col] = var.sqrt();
        }
        Self { means, stds }
    }

    /// Returns a transformed copy; zero-variance features are centred only.
    pub fn apply(&self, dataset: &Dataset) -> Dataset {
        let rows = dataset
            .rows()
            .iter()
            .map(|row| {
                let features = row
                    .features
                    .iter()
                    .enumerate()
                    .map(|(col, value)| {
                        value.map(|v| {
                            let m = self.means.get(col).copied().unwrap_or(0.0);
                            let s = self.stds.get(col).copied().unwrap_or(0.0);
                            if s > 0.0 {
                                (v - m) / s
                            } else {
                                v - m
                            }
                        })
                    })
                    .collect();
                Observation {
                    features,
                    ..row.clone()
                }
            })
            .collect();
        dataset.with_rows(rows)
    }
}
